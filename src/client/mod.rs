//! Client Module
//!
//! The offline-first mutation engine that runs on the device.
//!
//! # Architecture
//!
//! - **`config`** - Client configuration wrapper (server URL, database path)
//! - **`local_db`** - SQLite storage for the queue and sync metadata
//! - **`offline`** - Persistent mutation queue and quarantine policy
//! - **`session`** - Access token lifecycle with single-flight refresh
//! - **`dispatch`** - Remote application of queued mutations
//! - **`sync`** - Connectivity monitor, sync engine and background service
//!
//! # Module Structure
//!
//! ```text
//! client/
//! ├── mod.rs        - Module exports and documentation
//! ├── config.rs     - Configuration management
//! ├── local_db/     - Local SQLite database
//! ├── offline/      - Mutation queue
//! ├── session/      - Session coordinator and HTTP session client
//! ├── dispatch/     - RemoteDispatch trait and HTTP dispatcher
//! └── sync/         - Sync engine and service
//! ```

pub mod config;
pub mod dispatch;
pub mod local_db;
pub mod offline;
pub mod session;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use dispatch::{DispatchError, DispatchReceipt, HttpDispatcher, RemoteDispatch};
pub use local_db::LocalDatabase;
pub use offline::{MutationQueue, QueueError, QueueStats, RetryPolicy};
pub use session::{
    RefreshedToken, SessionClient, SessionCoordinator, SessionError, SessionRefresher,
    SessionState,
};
pub use sync::{
    ConnectivityMonitor, NetworkStatus, PassOutcome, PassReport, SyncEngine, SyncError,
    SyncService, SyncState,
};
