//! floorsync - Offline-First Mutation Engine
//!
//! floorsync lets a factory-operations client keep working without a
//! network. Attendance check-ins, production work entries and supervisor
//! validations are written to a local SQLite queue first and delivered to the
//! factory API once connectivity and a valid session allow it.
//!
//! # Overview
//!
//! - Persistent mutation queue that survives restarts
//! - Connectivity monitor with transition callbacks and a health probe
//! - Session coordinator with single-flight, rate-limited token refresh
//! - Remote dispatch with idempotency keys for at-least-once delivery
//! - Sync engine with a reentrancy guard and per-item failure isolation
//!
//! # Module Structure
//!
//! - **`shared`** - Mutation data model, configuration, shared errors
//! - **`client`** - Queue, session, dispatch and sync components
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use floorsync::client::{
//!     Config, ConnectivityMonitor, HttpDispatcher, LocalDatabase, MutationQueue, RetryPolicy,
//!     SessionClient, SessionCoordinator, SyncEngine, SyncService,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load(None)?;
//! let db = LocalDatabase::open(config.database_path()).await?;
//!
//! let session = SessionCoordinator::new(Arc::new(SessionClient::new(config.clone())?), config.app())
//!     .with_persistence(db.clone());
//! session.restore().await?;
//!
//! let engine = Arc::new(SyncEngine::new(
//!     MutationQueue::new(db, RetryPolicy::from_config(config.app())),
//!     session,
//!     Arc::new(HttpDispatcher::new(config.clone())),
//!     ConnectivityMonitor::new(true),
//!     config.app(),
//! ));
//!
//! let mut service = SyncService::new(engine, config.app());
//! service.start()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Each component has its own `thiserror` enum. Remote failures never
//! surface as errors from a pass; they are counted in the pass report and
//! the affected items stay queued. Only local storage failures are returned
//! as `Err`.

/// Shared types and data structures
pub mod shared;

/// Offline-first client components
pub mod client;
