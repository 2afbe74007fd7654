//! Entry point: load configuration, initialize logging, and run one pass
//! over every enabled pair. Meant to be invoked on a schedule (cron,
//! Kubernetes CronJob) rather than run as a long-lived daemon.

use std::time::Duration;

use clap::Parser;
use crosswatch::config::Config;
use crosswatch::state::sanitize_pair_scope;
use crosswatch::{logging, ManifestRegistry, ProgressEmitter, Reconciler};
use crosswatch_providers::Feature;
use tracing::{error, info, warn};

const PAIR_DEADLINE: Duration = Duration::from_secs(120);

#[derive(Parser, Debug)]
#[command(name = "crosswatch", about = "Reconcile configured library pairs for one pass")]
struct Cli {
    /// Directory holding config.json and the .cw_state/.cw_provider/snapshots trees.
    #[arg(long, env = "CW_CONFIG_DIR")]
    config_dir: Option<String>,

    /// Compute deltas and log them without issuing any add/remove calls.
    #[arg(long)]
    dry_run: bool,

    /// Restrict this run to a single pair scope (same value as `CW_PAIR_SCOPE`).
    #[arg(long)]
    pair: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config_dir.as_deref())?;
    let registry = ManifestRegistry::new();
    let known_providers: Vec<&str> = registry.manifests().iter().map(|m| m.name).collect();
    config.logging = logging::apply_env_overrides(config.logging.clone(), &known_providers);
    logging::init_logging(&config.logging)?;

    if let Err(errors) = config.validate() {
        for message in &errors {
            error!(%message, "invalid pair configuration");
        }
        anyhow::bail!("configuration validation failed");
    }

    let dry_run = cli.dry_run || config.capture_mode;
    let scope_filter = cli.pair.or_else(Config::active_pair_scope).map(|s| sanitize_pair_scope(&s));

    info!(pairs = config.pairs.len(), dry_run, "starting sync pass");

    let state_store = crosswatch::StateStore::new(config.state_dir());
    let reconciler = Reconciler::default();
    let mut failures = 0u32;
    let mut ran = 0u32;

    for pair in &config.pairs {
        if !pair.enabled {
            continue;
        }
        let scope = pair.scope_key();
        if let Some(filter) = &scope_filter {
            if sanitize_pair_scope(&scope) != *filter {
                continue;
            }
        }

        let Some((src, src_cfg)) = registry.resolve(&config, &pair.source.provider, &pair.source.instance) else {
            warn!(provider = %pair.source.provider, instance = %pair.source.instance, "source is not configured, skipping pair");
            continue;
        };
        let Some((dst, dst_cfg)) = registry.resolve(&config, &pair.target.provider, &pair.target.instance) else {
            warn!(provider = %pair.target.provider, instance = %pair.target.instance, "target is not configured, skipping pair");
            continue;
        };

        let mut state = state_store.load(&scope)?;

        for feature in [Feature::Watchlist, Feature::Ratings, Feature::History, Feature::Playlists] {
            if !pair.features.get(&feature).copied().unwrap_or(false) {
                continue;
            }
            ran += 1;
            let mut progress = ProgressEmitter::new(dst.manifest().name, feature.as_str());
            let attempt = reconciler.run(src, &src_cfg, dst, &dst_cfg, feature, pair.direction, &mut state, dry_run, &mut progress);

            match tokio::time::timeout(PAIR_DEADLINE, attempt).await {
                Ok(Ok(report)) => info!(
                    src = %src.manifest().name,
                    dst = %dst.manifest().name,
                    feature = %feature.as_str(),
                    added = report.added_to_dst.count,
                    removed = report.removed_from_dst.count,
                    status = %report.status,
                    "pair sync step complete"
                ),
                Ok(Err(err)) => {
                    failures += 1;
                    error!(src = %src.manifest().name, dst = %dst.manifest().name, feature = %feature.as_str(), %err, "pair sync step failed");
                }
                Err(_) => {
                    failures += 1;
                    error!(src = %src.manifest().name, dst = %dst.manifest().name, feature = %feature.as_str(), "pair sync step timed out");
                }
            }
        }

        if !dry_run {
            state_store.save(&scope, &state)?;
        }
    }

    if ran == 0 {
        warn!("no pair/feature combinations were enabled for this run");
    }
    if failures > 0 {
        anyhow::bail!("{failures} pair-sync step(s) failed");
    }

    info!("sync pass complete");
    Ok(())
}
