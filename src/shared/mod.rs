//! Shared Module
//!
//! Types shared by every part of the client: the mutation data model that is
//! both persisted locally and sent to the factory API, the shared error type,
//! and application configuration.

/// Mutation data model
pub mod mutation;

/// Shared error types
pub mod error;

/// Application configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{AppConfig, AppConfigBuilder, ConfigError};
pub use error::SharedError;
pub use mutation::{
    AttendanceAction, AttendancePayload, GeoFix, MutationId, MutationKind, MutationPayload,
    QueuedMutation, ValidationDecision, ValidationPayload, WorkEntryPayload,
};
