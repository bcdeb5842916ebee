//! reward-audit CLI: parameters, expected rewards, audit, bundle check.

use clap::{Parser, Subcommand};
use reward_audit::chain::LedgerSource;
use reward_audit::ledger::{ProviderTier, Round, RoundWindow, SnapshotSet};
use reward_audit::model::{block_reward_for_round, epoch_of, fee_reward_for_round};
use reward_audit::report::ReportData;
use reward_audit::store::RoundDataStore;
use reward_audit::verify::{
    reproducibility_hash, verify_bundle_hash, AuditBundle, ConsistencyVerifier, ProviderSummary,
};
use reward_audit::{AuditConfig, LedgerClient};
use reward_audit_report::render_report;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    match cli.command {
        Command::Params => run_params(&config),
        Command::Expected(args) => run_expected(&config, args),
        Command::Audit(args) => run_audit(&config, args),
        Command::CheckBundle(args) => run_check_bundle(args),
    }
}

#[derive(Parser)]
#[command(name = "reward-audit")]
#[command(author = "gorusys <goru.connector@outlook.com>")]
#[command(about = "Reconstruct and cross-check miner/sharder block and fee rewards")]
struct Cli {
    /// Config file; defaults to REWARD_AUDIT_CONFIG_PATH or ./config/reward_audit.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Sharder base URL, overrides the config file.
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the economic parameters the node reports.
    Params,
    /// Print the block and fee reward shares the model expects for a round.
    Expected(ExpectedArgs),
    /// Snapshot providers, wait, snapshot again, and verify every round in between.
    Audit(AuditArgs),
    /// Verify a bundle's reproducibility hash.
    CheckBundle(CheckBundleArgs),
}

#[derive(Parser)]
struct ExpectedArgs {
    #[arg(long)]
    round: Round,
    /// Fee pool of the round; fetched from the block when omitted.
    #[arg(long)]
    fees: Option<i64>,
}

#[derive(Parser)]
struct AuditArgs {
    /// Miner id to audit (repeatable).
    #[arg(long = "miner")]
    miners: Vec<String>,
    /// Sharder id to audit (repeatable).
    #[arg(long = "sharder")]
    sharders: Vec<String>,
    /// Seconds between the before and after snapshots.
    #[arg(long, default_value_t = 30)]
    wait_secs: u64,
    /// HTML report path; defaults to <reports-dir>/<name>.html.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long, default_value = "./reports")]
    reports_dir: PathBuf,
}

#[derive(Parser)]
struct CheckBundleArgs {
    #[arg(long)]
    bundle: PathBuf,
    /// Hash file; defaults to the `.sha256` next to the bundle.
    #[arg(long)]
    hash: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Result<AuditConfig, Box<dyn std::error::Error>> {
    let mut config = match &cli.config {
        Some(path) => AuditConfig::load_from_path(path)?,
        None => AuditConfig::load()?,
    };
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

fn client(config: &AuditConfig) -> Result<Arc<LedgerClient>, Box<dyn std::error::Error>> {
    Ok(Arc::new(LedgerClient::new(config.fetch_config())?))
}

fn run_params(config: &AuditConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = client(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let params = rt.block_on(async { client.economic_parameters().await })?;
    println!("{}", serde_json::to_string_pretty(&params)?);
    Ok(())
}

fn run_expected(config: &AuditConfig, args: ExpectedArgs) -> Result<(), Box<dyn std::error::Error>> {
    let client = client(config)?;
    let rt = tokio::runtime::Runtime::new()?;
    let (params, fees) = rt.block_on(async {
        let params = client.economic_parameters().await?;
        let fees = match args.fees {
            Some(fees) => fees,
            None => client.block(args.round).await?.total_fees(),
        };
        Ok::<_, reward_audit::FetchError>((params, fees))
    })?;
    let block = block_reward_for_round(args.round, &params);
    let fee = fee_reward_for_round(fees, &params);
    println!("round\t{}", args.round);
    println!("epoch\t{}", epoch_of(args.round, &params));
    println!("block_reward_miner\t{}", block.miner);
    println!("block_reward_sharder\t{}", block.sharder);
    println!("fees\t{}", fees);
    println!("fee_reward_miner\t{}", fee.miner);
    println!("fee_reward_sharder\t{}", fee.sharder);
    Ok(())
}

async fn snapshots(
    client: &LedgerClient,
    ids: &[(String, ProviderTier)],
) -> Result<SnapshotSet, reward_audit::FetchError> {
    let mut set = SnapshotSet::new();
    for (id, tier) in ids {
        let snapshot = client.provider_snapshot(id).await?;
        if snapshot.provider_type != *tier {
            warn!(provider = %id, expected = %tier, reported = %snapshot.provider_type, "provider type mismatch");
        }
        set.insert(id.clone(), snapshot);
    }
    Ok(set)
}

fn run_audit(config: &AuditConfig, args: AuditArgs) -> Result<(), Box<dyn std::error::Error>> {
    if args.miners.is_empty() && args.sharders.is_empty() {
        return Err("nothing to audit: pass at least one --miner or --sharder".into());
    }
    let ids: Vec<(String, ProviderTier)> = args
        .miners
        .iter()
        .map(|id| (id.clone(), ProviderTier::Miner))
        .chain(args.sharders.iter().map(|id| (id.clone(), ProviderTier::Sharder)))
        .collect();
    let client = client(config)?;
    let rt = tokio::runtime::Runtime::new()?;

    let (params, before, after) = rt.block_on(async {
        let params = client.economic_parameters().await?;
        let before = snapshots(&client, &ids).await?;
        info!(wait_secs = args.wait_secs, "waiting for rounds to elapse");
        tokio::time::sleep(Duration::from_secs(args.wait_secs)).await;
        let after = snapshots(&client, &ids).await?;
        Ok::<_, reward_audit::FetchError>((params, before, after))
    })?;

    let window = ids
        .iter()
        .filter_map(|(id, _)| Some(RoundWindow::between(before.get(id)?, after.get(id)?)))
        .fold(RoundWindow::new(1, 0), |acc, w| acc.union(&w));
    if window.is_empty() {
        return Err("no rounds were paid between the snapshots; increase --wait-secs".into());
    }
    info!(start = window.start, end = window.end, rounds = window.len(), "loading rounds");
    let mut store =
        RoundDataStore::new(window.start, window.end)?.with_policy(config.retry_policy());
    rt.block_on(store.load(Arc::clone(&client)))?;
    info!(requests = client.request_count(), "rounds loaded");

    let verifier = ConsistencyVerifier::new(&params, &store);
    let mut report = verifier.check_round_reward_frequency(store.range())?;
    report.merge(verifier.verify_tier(ProviderTier::Miner, &args.miners, &before, &after)?);
    report.merge(verifier.verify_tier(ProviderTier::Sharder, &args.sharders, &before, &after)?);

    let providers: BTreeMap<String, ProviderSummary> = ids
        .iter()
        .filter_map(|(id, tier)| {
            let (b, a) = (before.get(id)?, after.get(id)?);
            let window = RoundWindow::between(b, a);
            let rounds_won = store
                .rounds()
                .filter(|h| window.contains(h.round()) && h.is_winner(*tier, id))
                .count();
            Some((
                id.clone(),
                ProviderSummary {
                    tier: *tier,
                    window,
                    rounds_won,
                    reward_delta: a.total_reward - b.total_reward,
                },
            ))
        })
        .collect();

    let bundle = AuditBundle::new(params, store.range(), store.total_fees(), providers, report);
    let hash = reproducibility_hash(&bundle)?;
    let data = ReportData {
        bundle,
        reproducibility_hash_sha256: hash.clone(),
    };

    std::fs::create_dir_all(&args.reports_dir)?;
    let name = format!("rounds-{}-{}", window.start, window.end);
    let html_path = args
        .out
        .unwrap_or_else(|| args.reports_dir.join(format!("{}.html", name)));
    let bundle_path = args.reports_dir.join(format!("{}.bundle.json", name));
    let hash_path = args.reports_dir.join(format!("{}.sha256", name));
    render_report(&data, &html_path)?;
    std::fs::write(&bundle_path, serde_json::to_string_pretty(&data.bundle)?)?;
    std::fs::write(&hash_path, format!("{}\n", hash))?;
    info!(?html_path, ?bundle_path, ?hash_path, "audit complete");

    let report = &data.bundle.report;
    for failure in &report.failures {
        println!("FAIL\t{}", failure);
    }
    if report.passed() {
        println!("PASS\t{}\t{}", report.checks.len(), hash);
    } else {
        println!("FAILED\t{} failures\t{}", report.failures.len(), hash);
        std::process::exit(1);
    }
    Ok(())
}

/// `reports/rounds-1-9.bundle.json` -> `reports/rounds-1-9.sha256`.
fn hash_path_for(bundle: &Path) -> PathBuf {
    let file_name = bundle.file_name().unwrap_or_default().to_string_lossy();
    let stem = file_name
        .strip_suffix(".bundle.json")
        .or_else(|| file_name.strip_suffix(".json"))
        .unwrap_or(&*file_name);
    bundle
        .parent()
        .unwrap_or(Path::new("."))
        .join(format!("{}.sha256", stem))
}

fn run_check_bundle(args: CheckBundleArgs) -> Result<(), Box<dyn std::error::Error>> {
    let bundle_json = std::fs::read_to_string(&args.bundle)?;
    let bundle: AuditBundle = serde_json::from_str(&bundle_json)?;
    let hash_path = args.hash.unwrap_or_else(|| hash_path_for(&args.bundle));
    let expected = std::fs::read_to_string(&hash_path).ok();
    let result = verify_bundle_hash(&bundle, expected.as_deref())?;
    if result.matches {
        println!("OK\t{}", result.bundle_hash);
    } else {
        eprintln!(
            "MISMATCH\tcomputed={}\texpected={:?}",
            result.bundle_hash, result.expected_hash
        );
        std::process::exit(1);
    }
    Ok(())
}
