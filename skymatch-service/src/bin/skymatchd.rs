use anyhow::{bail, Context};
use clap::Parser;
use skymatch_service::{CrossmatchService, ServiceConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skymatchd")]
#[command(about = "Crossmatch incoming transient alerts against active probability skymaps")]
struct Cli {
    /// Base URL of the upstream alert portal
    #[arg(long, env = "SKYMATCH_PORTAL_URL")]
    portal_url: String,

    /// Portal API token
    #[arg(long, env = "SKYMATCH_API_TOKEN", hide_env_values = true)]
    token: String,

    /// Acceptance threshold: alerts inside this credible region match
    #[arg(long, default_value_t = 0.9)]
    threshold: f64,

    /// Seconds between poll cycles
    #[arg(long, default_value_t = 20)]
    poll_interval: u64,

    /// Days of localization events to load on a cold start
    #[arg(long, default_value_t = 2.0)]
    lookback_days: f64,

    /// Candidates below this signal-to-noise ratio are ignored
    #[arg(long, default_value_t = 5.0)]
    min_snr: f64,

    /// Comma-separated portal group ids to listen to (all when omitted)
    #[arg(long)]
    groups: Option<String>,

    /// Number of evaluation workers
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// Log decisions locally instead of posting annotations
    #[arg(long)]
    dry_run: bool,

    /// Run a single poll cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if !(0.0..=1.0).contains(&cli.threshold) {
        bail!("--threshold must be within [0, 1], got {}", cli.threshold);
    }

    let mut config = ServiceConfig {
        portal_url: cli.portal_url,
        api_token: cli.token,
        poll_interval_s: cli.poll_interval,
        lookback_days: cli.lookback_days,
        min_snr: cli.min_snr,
        workers: cli.workers,
        annotate: !cli.dry_run,
        ..ServiceConfig::default()
    };
    config.engine.acceptance_threshold = cli.threshold;
    if let Some(groups) = cli.groups {
        config.group_ids = groups
            .split(',')
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect();
    }

    let mut service =
        CrossmatchService::new(config).context("failed to construct the crossmatch service")?;
    service
        .check_portal()
        .await
        .context("portal preflight failed")?;
    tracing::info!("portal reachable, token accepted");

    if cli.once {
        service.poll_once().await.context("poll cycle failed")?;
        service.shutdown().await;
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    service.run(shutdown_rx).await?;
    Ok(())
}
