//! Shroud reference daemon.
//!
//! Wires one [`Shroud`] over process-local in-memory stores and runs the
//! rotation sweep and routing cleanup against it until interrupted. There is
//! no network listener: a deployment links the library, builds its own
//! [`Shroud`] over shared stores and hands clones of it to both its transport
//! and [`run_periodic`], as this binary does.
//!
//! With `--demo-sessions N` the daemon seeds N sessions, each routing one
//! message, through the same instance the sweeps use, so rotation and cleanup
//! have live state to work on. Without it the stores start empty and the
//! sweeps report empty passes.
//!
//! # Usage
//!
//! ```bash
//! shroud-server --demo-sessions 100 --rotation-interval-secs 60 --rotation-sweep-secs 30
//! RUST_LOG=shroud::security=warn,info shroud-server
//! ```

use std::time::Duration;

use clap::Parser;
use shroud_core::{Environment, ShroudError};
use shroud_server::{
    Backends, Delivery, ExpiringStore, MemoryMailbox, MemoryMessageStore, MemoryStore,
    MessageStore, RouteOptions, ScanPolicy, ServerConfig, SessionSeed, Shroud, SystemEnv,
    run_periodic,
};
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Shroud anonymous session and routing daemon
#[derive(Parser, Debug)]
#[command(name = "shroud-server")]
#[command(about = "Anonymous session lifecycle and metadata-stripping routing")]
#[command(version)]
struct Args {
    /// Session lifetime in seconds, extended on every access
    #[arg(long, default_value = "86400")]
    session_ttl_secs: u64,

    /// Age in seconds after which a secondary id is rotated
    #[arg(long, default_value = "3600")]
    rotation_interval_secs: u64,

    /// Seconds between rotation sweeps
    #[arg(long, default_value = "600")]
    rotation_sweep_secs: u64,

    /// Seconds between routing cleanups
    #[arg(long, default_value = "3600")]
    cleanup_secs: u64,

    /// Sessions rotated in parallel per sweep
    #[arg(long, default_value = "16")]
    rotation_concurrency: usize,

    /// Largest accepted envelope in bytes
    #[arg(long, default_value = "1048576")]
    max_envelope_size: usize,

    /// Field-name scan policy (strict, deny-list)
    #[arg(long, default_value = "strict")]
    scan_policy: ScanPolicy,

    /// Sessions to seed at startup, each routing one message
    #[arg(long, default_value = "0")]
    demo_sessions: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn config(&self) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.session.session_ttl = Duration::from_secs(self.session_ttl_secs);
        config.session.rotation_interval = Duration::from_secs(self.rotation_interval_secs);
        config.sweeps.rotation_every = Duration::from_secs(self.rotation_sweep_secs);
        config.sweeps.cleanup_every = Duration::from_secs(self.cleanup_secs);
        config.sweeps.rotation_concurrency = self.rotation_concurrency;
        config.router.max_envelope_size = self.max_envelope_size;
        config.router.scan_policy = self.scan_policy;
        config
    }
}

/// Payload routed by seeded sessions (unpadded URL-safe base64)
const DEMO_ENVELOPE: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8";

/// Create `count` sessions through `shroud`, each routing one message to its
/// own chat.
async fn seed_demo_traffic<E, S, M, D>(
    shroud: &Shroud<E, S, M, D>,
    count: usize,
) -> Result<(), ShroudError>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    for index in 0..count {
        let created = shroud.sessions.create_session(SessionSeed::default()).await?;
        let chat_id = format!("demo-chat-{index:06}");
        shroud
            .router
            .route_message(DEMO_ENVELOPE, &chat_id, &created.primary_id, RouteOptions::default())
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = args.config();
    tracing::info!(
        session_ttl = ?config.session.session_ttl,
        rotation_interval = ?config.session.rotation_interval,
        scan_policy = ?config.router.scan_policy,
        "Shroud server starting"
    );

    let env = SystemEnv::new();
    let store = MemoryStore::new(env.clone());
    let backends = Backends {
        sessions: store.clone(),
        messages: MemoryMessageStore::new(),
        routing: store.clone(),
    };
    let shroud = Shroud::new(env.clone(), backends, MemoryMailbox::new(), config);

    seed_demo_traffic(&shroud, args.demo_sessions).await?;
    if args.demo_sessions > 0 {
        tracing::info!(sessions = args.demo_sessions, entries = store.len(), "demo traffic seeded");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let rotation = tokio::spawn(run_periodic(env.clone(), shroud.rotation_sweep(), shutdown_rx.clone()));
    let cleanup = tokio::spawn(run_periodic(env, shroud.routing_cleanup(), shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown_tx.send(true)?;
    rotation.await?;
    cleanup.await?;

    let stats = shroud.router.routing_stats().await?;
    tracing::info!(
        active_chats = stats.active_chats,
        indexed_messages = stats.indexed_messages,
        purged = store.purge_expired(),
        "final routing state"
    );

    tracing::info!("Shroud server stopped");
    Ok(())
}
