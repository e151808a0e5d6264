//! Mizzen Core - shared foundations for the Mizzen rich-text content pipeline
//!
//! This crate provides the error types, configuration and event system used
//! by the editor pipeline and the command line tools.

pub mod config;
pub mod error;
pub mod event;

#[cfg(test)]
mod event_test;

// Re-export commonly used types
pub use config::{
    Config, ConfigLoadContext, EditorConfig, LoggingConfig, ValidationError, ValidationResult,
    ValidationWarning,
};
pub use error::{ErrorSeverity, MizzenError, RemoteError, Result};
pub use event::{
    EditorEvent, EventBus, EventEmitter, EventHandler, InMemoryEventBus, SaveStatus,
    SubscriptionId,
};
