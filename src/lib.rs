//! Event Engine – schema-validated messages and rule-driven state transitions
//!
//! This crate implements the shared engine beneath model-driven event-sourcing
//! tooling:
//! - `$ref` resolution against a shared definition registry and a cache of
//!   compiled JSON Schema validators keyed by schema identity
//! - Message factories producing validated command, event and query envelopes
//!   or bare value objects
//! - A declarative, versioned rule language computing aggregate state from
//!   events and collecting deferred side effects
//! - An action-driven registry with atomic, snapshot-isolated updates

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Declarative rule language and interpreter
pub mod interpreter;
/// Message descriptors, envelopes and factories
pub mod messaging;
/// Registry, engine facade and storage
pub mod runtime;
/// Schema resolution and compiled validators
pub mod schema;

// Re-export key types for convenience
pub use interpreter::{Rule, RuleContext, evaluate};
pub use messaging::{Envelope, MessageFactory, MessageKind};
pub use runtime::{Engine, EngineConfig, RegistryAction, RegistryStore};

/// Current version of the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
