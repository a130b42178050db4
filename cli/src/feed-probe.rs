//! # feed-probe
//!
//! Connects to one provider of a feed document, checks reachability, pulls a
//! snapshot, infers its schema and prints a JSON report. With `--follow` it
//! then stays in real-time mode for a while and reports the update traffic.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{ArgAction, Parser, ValueHint};
use lib_datafeed::configs::{FeedConfig, ProviderConfig, load_feed_config};
use lib_datafeed::core::BatchCallback;
use lib_datafeed::loggers::setup_logging;
use lib_datafeed::providers::build_provider;
use lib_datafeed::schema::{flatten_fields, infer_fields};
use serde_json::{Value, json};
use tracing::{info, warn};

/// Snapshot cap when neither the command line nor the provider sets one.
const DEFAULT_MAX_ROWS: usize = 10_000;

#[derive(Parser, Debug)]
#[clap(
    name = "feed-probe",
    version = "1.0.0",
    author = "ckir",
    about = "Probes a data provider and reports its snapshot schema.",
    long_about = "Loads a JSON5 feed document, checks that the selected provider is reachable, \
                  fetches a bounded snapshot and prints the inferred field paths, types and \
                  traffic statistics as JSON."
)]
struct Args {
    /// Feed document to load.
    #[clap(long, env = "FEED_CONFIG_PATH", value_hint = ValueHint::FilePath, default_value = "feed.json5")]
    config: PathBuf,

    /// Provider ID inside the feed document. Optional when it holds exactly one.
    #[clap(long, env = "FEED_PROVIDER")]
    provider: Option<String>,

    /// Overrides the WebSocket URL of a streaming provider.
    #[clap(long, env = "FEED_URL")]
    url: Option<String>,

    /// Overrides the listener topic of a streaming provider.
    #[clap(long, env = "FEED_TOPIC")]
    topic: Option<String>,

    /// Socket.IO namespace to join instead of the configured one.
    #[clap(long, env = "FEED_NAMESPACE")]
    namespace: Option<String>,

    #[clap(long, env = "FEED_KEY_COLUMN")]
    key_column: Option<String>,

    /// Snapshot row cap; 0 disables the cap.
    #[clap(long, env = "FEED_MAX_ROWS")]
    max_rows: Option<usize>,

    #[clap(long, env = "FEED_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[clap(long, env = "FEED_LOG_LEVEL")]
    log_level: Option<String>,

    #[clap(long, env = "FEED_LOG_DIR", value_hint = ValueHint::DirPath)]
    log_dir: Option<PathBuf>,

    /// Seconds to stay in real-time mode after the snapshot.
    #[clap(long, value_name = "SECONDS")]
    follow: Option<u64>,

    /// Skip the reachability check.
    #[clap(long, action = ArgAction::SetTrue)]
    skip_check: bool,
}

impl Args {
    /// Applies command-line overrides on top of the configured provider.
    fn apply(&self, config: &mut ProviderConfig) {
        match config {
            ProviderConfig::Stomp(t) | ProviderConfig::WebSocket(t) | ProviderConfig::SocketIo(t) => {
                if let Some(url) = &self.url {
                    t.websocket_url = url.clone();
                }
                if let Some(topic) = &self.topic {
                    t.listener_topic = topic.clone();
                }
                if let Some(timeout) = self.timeout_ms {
                    t.snapshot_timeout_ms = timeout;
                }
                t.key_column = self.key_column.clone().or(t.key_column.take());
                t.namespace = self.namespace.clone().or(t.namespace.take());
            }
            ProviderConfig::Rest(r) => {
                if let Some(url) = &self.url {
                    r.base_url = url.clone();
                }
                r.key_column = self.key_column.clone().or(r.key_column.take());
            }
            ProviderConfig::Mock(m) => {
                if let Some(key) = &self.key_column {
                    m.key_column = key.clone();
                }
            }
            ProviderConfig::AppData(a) => {
                a.key_column = self.key_column.clone().or(a.key_column.take());
            }
        }
    }
}

fn select_provider(feed: &FeedConfig, requested: Option<&str>) -> anyhow::Result<(String, ProviderConfig)> {
    if let Some(id) = requested {
        return Ok((id.to_string(), feed.provider(id)?.clone()));
    }
    let mut providers = feed.providers.iter();
    match (providers.next(), providers.next()) {
        (Some((id, config)), None) => Ok((id.clone(), config.clone())),
        (None, _) => bail!("The feed document defines no providers"),
        _ => bail!(
            "Several providers defined ({}); pick one with --provider",
            feed.providers.keys().cloned().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn progress_logger(provider: String) -> BatchCallback {
    Box::new(move |rows: &[Value], total: usize| {
        info!(provider = %provider, batch = rows.len(), total, "Snapshot progress");
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let mut feed = if args.config.exists() {
        load_feed_config(&args.config).with_context(|| format!("Loading {}", args.config.display()))?
    } else {
        FeedConfig::default()
    };
    if let Some(level) = &args.log_level {
        feed.logging.level = level.clone();
    }
    if let Some(dir) = &args.log_dir {
        feed.logging.dir = dir.clone();
    }
    let _guard = setup_logging(&feed.logging)?;

    let (id, mut config) = select_provider(&feed, args.provider.as_deref())?;
    args.apply(&mut config);
    let max_rows = args.max_rows.or(config.max_rows()).unwrap_or(DEFAULT_MAX_ROWS);

    let mut provider = build_provider(&config)?;
    info!(id = %id, provider = %provider.provider_type(), max_rows, "Probing provider");

    if !args.skip_check && !provider.check_connection().await? {
        bail!("Provider '{id}' is not reachable");
    }

    let outcome = provider
        .fetch_snapshot(max_rows, Some(progress_logger(id.clone())))
        .await?;
    if !outcome.success {
        bail!(
            "Snapshot from '{id}' failed: {}",
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }

    let fields = infer_fields(outcome.rows());
    let schema: Vec<Value> = flatten_fields(&fields)
        .into_iter()
        .map(|field| {
            json!({
                "path": field.path,
                "name": field.name(),
                "depth": field.depth(),
                "type": field.field_type.as_str(),
                "nullable": field.nullable,
                "sample": field.sample,
            })
        })
        .collect();

    let report = json!({
        "provider": id,
        "providerType": provider.provider_type().as_str(),
        "rows": outcome.rows().len(),
        "schema": schema,
        "statistics": provider.statistics(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(seconds) = args.follow {
        let mut updates = provider.start_realtime().await?;
        let deadline = tokio::time::sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => {
                    warn!("Interrupted");
                    break;
                }
                batch = updates.recv() => match batch {
                    Some(batch) => info!(rows = batch.rows.len(), bytes = batch.bytes, "Update received"),
                    None => break,
                },
            }
        }
        provider.disconnect().await;
        println!("{}", serde_json::to_string_pretty(&provider.statistics())?);
    }

    Ok(())
}
