//! probe-agent — standalone runtime for the interception rule engine.
//!
//! Loads the instrumentation rule document, populates the rule
//! registry, and keeps both synchronized with the file on disk:
//! - watches the document with a debounced file watcher
//! - on each change, reloads and reapplies only affected types
//!
//! The weaving backend here is a logging stub; an embedding host
//! supplies a real `Weaver` implementation.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter};

use dynaprobe_agent::{Management, RuleRegistry, Weaver};
use dynaprobe_core::config::{load_dotenv, ENV_CONFIG_PATH};
use dynaprobe_rules::{ChangeWatcher, ConfigManager, WatcherConfig};

// ── CLI ─────────────────────────────────────────────────────────────

/// Interception rule engine with hot reload.
#[derive(Parser, Debug)]
#[command(name = "probe-agent", version, about)]
struct Cli {
    /// Path to the instrumentation rule document.
    #[arg(long, env = ENV_CONFIG_PATH)]
    config: Option<String>,

    /// Debounce window for file change bursts, in milliseconds.
    #[arg(long, env = "DYNAPROBE_DEBOUNCE_MS", default_value_t = 500)]
    debounce_ms: u64,

    /// Poll interval for the watcher loop, in milliseconds.
    #[arg(long, env = "DYNAPROBE_POLL_MS", default_value_t = 1000)]
    poll_ms: u64,
}

// ── LoggingWeaver ───────────────────────────────────────────────────

/// Stand-in weaver that records reapplication requests in the log.
struct LoggingWeaver;

impl Weaver for LoggingWeaver {
    fn reapply(&self, affected_types: &BTreeSet<String>) {
        for type_name in affected_types {
            info!(type_name = %type_name, "reapplication requested");
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let (filter, filter_handle) = reload::Layer::new(filter);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let manager = Arc::new(ConfigManager::new(cli.config.as_deref()));
    let registry = Arc::new(RuleRegistry::new());
    let management = Arc::new(Management::new(
        Arc::clone(&manager),
        Arc::clone(&registry),
        Arc::new(LoggingWeaver),
    ));

    // Route the management debug toggle to the live log filter.
    management.set_debug_hook(move |enabled| {
        let directive = if enabled { "debug" } else { "info" };
        if let Err(e) = filter_handle.reload(EnvFilter::new(directive)) {
            warn!(error = %e, "failed to update log filter");
        }
    });

    info!(
        path = %management.config_source_path().display(),
        "probe-agent starting"
    );

    // Initial load: populate the registry before watching for changes.
    management.reload_configuration();
    info!(
        rules = management.rule_count(),
        types = management.intercepted_type_count(),
        "initial configuration applied"
    );

    let watcher_config = WatcherConfig {
        debounce: Duration::from_millis(cli.debounce_ms),
        poll_interval: Duration::from_millis(cli.poll_ms),
    };
    let mut watcher = ChangeWatcher::new(management.config_source_path(), watcher_config);

    let management_for_watch = Arc::clone(&management);
    watcher.add_listener(move || {
        management_for_watch.reload_configuration();
    });
    watcher.start()?;
    info!("watching rule document for changes");

    loop {
        thread::park();
    }
}
