//! Static HTML report generation from a reward audit bundle.

use reward_audit::verify::{Failure, ProviderSummary};
use reward_audit::ReportData;
use std::fmt::Write as _;
use std::io::Write;
use std::path::Path;

/// Render a static HTML report to `out_path`. Embeds the full report JSON for verification.
pub fn render_report(data: &ReportData, out_path: impl AsRef<Path>) -> Result<(), ReportError> {
    let html = build_html(data)?;
    let mut f = std::fs::File::create(out_path.as_ref()).map_err(ReportError::Io)?;
    f.write_all(html.as_bytes()).map_err(ReportError::Io)?;
    Ok(())
}

/// Build HTML string from report data (for testing or in-memory use).
pub fn build_html(data: &ReportData) -> Result<String, ReportError> {
    let json_embed = serde_json::to_string(&data).map_err(ReportError::Json)?;
    let bundle = &data.bundle;
    let params = &bundle.params;
    let report = &bundle.report;
    let (status, status_class) = if report.passed() {
        ("PASS", "ok")
    } else {
        ("FAIL", "bad")
    };
    let checks = if report.checks.is_empty() {
        "none".to_string()
    } else {
        report.checks.join(", ")
    };

    let html = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width,initial-scale=1"/>
<title>Reward Audit – rounds {start}..{end}</title>
<style>
:root {{ font-family: system-ui, sans-serif; background: #0f1419; color: #e6edf3; }}
body {{ max-width: 860px; margin: 0 auto; padding: 1.5rem; }}
h1 {{ font-size: 1.4rem; margin-bottom: 0.5rem; }}
h2 {{ font-size: 1.1rem; margin-top: 1.5rem; color: #8b949e; }}
.mono {{ font-family: ui-monospace, monospace; font-size: 0.9em; word-break: break-all; }}
.card {{ background: #161b22; border: 1px solid #30363d; border-radius: 6px; padding: 1rem; margin: 0.5rem 0; }}
.grid {{ display: grid; grid-template-columns: auto 1fr; gap: 0.25rem 1rem; }}
.label {{ color: #8b949e; }}
.hash {{ font-size: 0.85em; }}
.ok {{ color: #3fb950; font-weight: 600; }}
.bad {{ color: #f85149; font-weight: 600; }}
table {{ width: 100%; border-collapse: collapse; font-size: 0.9em; }}
th, td {{ text-align: left; padding: 0.25rem 0.5rem; border-bottom: 1px solid #30363d; }}
th {{ color: #8b949e; font-weight: normal; }}
.footer {{ margin-top: 2rem; font-size: 0.85rem; color: #8b949e; }}
</style>
</head>
<body>
<h1>Reward Audit Report</h1>
<p>Rounds <span class="mono">{start}</span> to <span class="mono">{end}</span> · <span class="{status_class}">{status}</span></p>
<p>Generated: {created}</p>

<h2>Reproducibility</h2>
<div class="card">
  <div class="mono hash">SHA-256: {hash}</div>
  <p class="footer">Anyone can verify this report by re-running <code>reward-audit check-bundle --bundle &lt;file&gt;</code> and comparing the hash.</p>
</div>

<h2>Summary</h2>
<div class="card">
  <div class="grid">
    <span class="label">Checks</span><span class="mono">{checks}</span>
    <span class="label">Failures</span><span class="mono">{failure_count}</span>
    <span class="label">Total fees (units)</span><span class="mono">{total_fees}</span>
    <span class="label">Providers</span><span class="mono">{provider_count}</span>
  </div>
</div>

<h2>Economic parameters</h2>
<div class="card">
  <div class="grid">
    <span class="label">Epoch length (rounds)</span><span class="mono">{epoch_length}</span>
    <span class="label">Reward decline rate</span><span class="mono">{decline}</span>
    <span class="label">Base block reward (units)</span><span class="mono">{base_reward}</span>
    <span class="label">Miner share ratio</span><span class="mono">{share_ratio}</span>
    <span class="label">Miner / sharder delegates rewarded</span><span class="mono">{miner_delegates} / {sharder_delegates}</span>
    <span class="label">Sharders rewarded per round</span><span class="mono">{sharders_per_round}</span>
  </div>
</div>

<h2>Providers</h2>
<div class="card">
{providers}
</div>

<h2>Discrepancies</h2>
<div class="card">
{failures}
</div>

<h2>Audit bundle (embedded)</h2>
<div class="card">
  <p class="footer">The full audit bundle is embedded below for verification. Do not edit.</p>
  <script type="application/json" id="audit-bundle">{json_embed}</script>
</div>

<div class="footer">
  <p>Generated by <a href="https://github.com/gorusys/reward-audit" style="color:#58a6ff">reward-audit</a>. Read-only tool; no keys; no signing.</p>
</div>
</body>
</html>"#,
        start = bundle.round_range.start,
        end = bundle.round_range.end,
        status = status,
        status_class = status_class,
        created = escape_html(&bundle.created_utc_rfc3339),
        hash = escape_html(&data.reproducibility_hash_sha256),
        checks = escape_html(&checks),
        failure_count = report.failures.len(),
        total_fees = bundle.total_fees,
        provider_count = bundle.providers.len(),
        epoch_length = params.epoch_length,
        decline = params.reward_decline_rate,
        base_reward = params.base_block_reward,
        share_ratio = params.share_ratio,
        miner_delegates = params.num_miner_delegates_rewarded,
        sharder_delegates = params.num_sharder_delegates_rewarded,
        sharders_per_round = params.num_sharders_rewarded_per_round,
        providers = provider_table(bundle.providers.iter()),
        failures = failure_table(&report.failures),
        json_embed = escape_json_in_html(&json_embed),
    );
    Ok(html)
}

fn provider_table<'a>(providers: impl Iterator<Item = (&'a String, &'a ProviderSummary)>) -> String {
    let mut rows = String::new();
    for (id, p) in providers {
        let window = if p.window.is_empty() {
            "—".to_string()
        } else {
            format!("{}..{}", p.window.start, p.window.end)
        };
        let _ = write!(
            rows,
            "<tr><td class=\"mono\">{}</td><td>{}</td><td class=\"mono\">{}</td><td>{}</td><td class=\"mono\">{}</td></tr>",
            escape_html(id),
            p.tier,
            window,
            p.rounds_won,
            p.reward_delta,
        );
    }
    if rows.is_empty() {
        return "<p class=\"label\">No providers audited.</p>".to_string();
    }
    format!(
        "<table><thead><tr><th>Provider</th><th>Tier</th><th>Window</th><th>Rounds won</th><th>Reward delta</th></tr></thead><tbody>{}</tbody></table>",
        rows
    )
}

fn failure_table(failures: &[Failure]) -> String {
    if failures.is_empty() {
        return "<p class=\"ok\">No discrepancies found.</p>".to_string();
    }
    let mut rows = String::new();
    for f in failures {
        let _ = write!(
            rows,
            "<tr><td class=\"mono\">{}</td><td>{}</td><td class=\"mono\">{}</td><td class=\"mono\">{}</td><td class=\"mono\">{}</td><td class=\"mono\">{}</td></tr>",
            f.round,
            f.rule,
            escape_html(f.provider_id.as_deref().unwrap_or("")),
            escape_html(f.pool_id.as_deref().unwrap_or("")),
            f.expected,
            f.actual,
        );
    }
    format!(
        "<table><thead><tr><th>Round</th><th>Rule</th><th>Provider</th><th>Pool</th><th>Expected</th><th>Actual</th></tr></thead><tbody>{}</tbody></table>",
        rows
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn escape_json_in_html(s: &str) -> String {
    escape_html(s)
}

#[derive(Debug)]
pub enum ReportError {
    Io(std::io::Error),
    Json(serde_json::Error),
}

impl std::fmt::Display for ReportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportError::Io(e) => write!(f, "io: {}", e),
            ReportError::Json(e) => write!(f, "json: {}", e),
        }
    }
}

impl std::error::Error for ReportError {}
