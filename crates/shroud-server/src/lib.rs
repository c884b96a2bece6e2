//! Shroud server.
//!
//! Anonymous session lifecycle and metadata-stripping message routing over
//! injected stores.
//!
//! # Architecture
//!
//! ```text
//!   client ──envelope──▶ Router ──resolve sender──▶ SessionManager
//!                          │                            │
//!                          ├─▶ MessageStore             ├─▶ ExpiringStore (sessions)
//!                          ├─▶ ExpiringStore (routing)  │
//!                          └─▶ Delivery (channels)      │
//!                                                       │
//!   RotationSweep ─────────────────────────────────────┘
//!   RoutingCleanup ──▶ Router
//! ```
//!
//! Nothing in process memory is authoritative: every component reads and
//! writes through its store, so several server processes can share one store.
//! All time and randomness come from an [`Environment`], so the whole server
//! runs deterministically in simulation.
//!
//! # Components
//!
//! - [`SessionManager`]: session creation, resolution, rotation, security
//!   checks, emergency invalidation
//! - [`Router`]: message routing, leakage scan, routing index, channels
//! - [`storage`]: store traits with in-memory and fault-injecting
//!   implementations
//! - [`sweep`]: periodic rotation and cleanup tasks
//! - [`SystemEnv`]: production environment (real time, OS RNG)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod config;
pub mod delivery;
pub mod retry;
pub mod router;
pub mod session;
pub mod storage;
pub mod sweep;
mod system_env;

pub use config::{RouterConfig, ServerConfig, SessionConfig, SweepConfig};
pub use delivery::{DeliveredEnvelope, Delivery, DeliveryError, MemoryMailbox};
pub use retry::RetryPolicy;
pub use router::{MessageRecord, MessageType, RouteOptions, Router, ScanPolicy};
pub use session::{Activity, AnonymousSession, SessionManager, SessionSeed};
use shroud_core::Environment;
pub use storage::{
    ChaoticStore, ExpiringStore, MemoryMessageStore, MemoryStore, MessageStore, StorageError,
};
pub use sweep::{PeriodicTask, RotationSweep, RoutingCleanup, run_periodic};
pub use system_env::SystemEnv;

/// The stores a server runs on.
///
/// `sessions` and `routing` may be clones of one store.
#[derive(Clone)]
pub struct Backends<S: ExpiringStore, M: MessageStore> {
    /// Sessions, identifier mappings and rotation audits
    pub sessions: S,
    /// Persisted message records
    pub messages: M,
    /// Routing buckets and channels
    pub routing: S,
}

/// A wired-up server: session manager, router and sweep settings.
#[derive(Clone)]
pub struct Shroud<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    /// Session lifecycle manager
    pub sessions: SessionManager<E, S>,
    /// Message router
    pub router: Router<E, S, M, D>,
    sweeps: SweepConfig,
}

impl<E, S, M, D> Shroud<E, S, M, D>
where
    E: Environment,
    S: ExpiringStore,
    M: MessageStore,
    D: Delivery,
{
    /// Wire a server over `backends`.
    pub fn new(env: E, backends: Backends<S, M>, delivery: D, config: ServerConfig) -> Self {
        let ServerConfig { session, router, sweeps, retry } = config;

        let sessions = SessionManager::new(env.clone(), backends.sessions, session, retry.clone());
        let router = Router::new(
            env,
            sessions.clone(),
            backends.routing,
            backends.messages,
            delivery,
            router,
            retry,
        );

        Self { sessions, router, sweeps }
    }

    /// The background rotation sweep for this server.
    pub fn rotation_sweep(&self) -> RotationSweep<E, S> {
        RotationSweep::new(
            self.sessions.clone(),
            self.sweeps.rotation_every,
            self.sweeps.rotation_concurrency,
        )
    }

    /// The background routing cleanup for this server.
    pub fn routing_cleanup(&self) -> RoutingCleanup<E, S, M, D> {
        RoutingCleanup::new(self.router.clone(), self.sweeps.cleanup_every)
    }
}
