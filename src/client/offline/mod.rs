//! # Offline Mutation Store
//!
//! Offline-first capture of attendance, work entries and validations. Every
//! mutation is written to the local queue before any network call is made;
//! the sync engine drains the queue whenever connectivity and a session
//! allow it.
//!
//! ## Key Components
//!
//! - `queue.rs`: persistent `MutationQueue` over the local database
//! - `retry.rs`: rejection counting and quarantine policy
//!
//! ## Usage
//!
//! ```rust,no_run
//! use floorsync::client::local_db::LocalDatabase;
//! use floorsync::client::offline::{MutationQueue, RetryPolicy};
//!
//! # async fn example() -> Result<(), floorsync::client::offline::QueueError> {
//! let db = LocalDatabase::new().await?;
//! let queue = MutationQueue::new(db, RetryPolicy::new(5));
//!
//! let stats = queue.stats().await?;
//! println!("{} pending, {} quarantined", stats.pending, stats.quarantined);
//! # Ok(())
//! # }
//! ```

pub mod queue;
pub mod retry;

pub use queue::{MutationQueue, QueueError, QueueStats};
pub use retry::{FailureDisposition, RetryPolicy};
