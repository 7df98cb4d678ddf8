//! Message descriptors, envelopes and factories
//!
//! A factory turns a raw schema plus the shared definition registry into a
//! callable that validates payloads and wraps them into envelopes (commands,
//! events, queries) or hands back the bare value (value objects and state).

/// Message kinds and descriptors.
pub mod descriptor;
/// The envelope wrapped around commands, events and queries.
pub mod envelope;
/// Validating message factories.
pub mod factory;

pub use descriptor::{MessageDescriptor, MessageKind};
pub use envelope::{Envelope, Meta};
pub use factory::{InitFn, Message, MessageFactory};
