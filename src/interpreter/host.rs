use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

/// A deferred capability call collected from an `execute` rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    /// Capability name
    pub capability: String,
    /// Resolved argument values
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// Names of the capabilities a host provides.
pub trait CapabilityCatalog {
    /// Whether `name` can be executed by the host.
    fn has_capability(&self, name: &str) -> bool;
}

/// Catalog that knows no capabilities; any `execute` node fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCapabilities;

impl CapabilityCatalog for NoCapabilities {
    fn has_capability(&self, _name: &str) -> bool {
        false
    }
}

impl CapabilityCatalog for HashSet<String> {
    fn has_capability(&self, name: &str) -> bool {
        self.contains(name)
    }
}

impl CapabilityCatalog for BTreeSet<String> {
    fn has_capability(&self, name: &str) -> bool {
        self.contains(name)
    }
}

type Handler = Box<dyn FnMut(&Map<String, Value>) -> Result<()> + Send>;

/// Host-side table of side-effecting capabilities.
///
/// The interpreter only consults the names; [`CapabilityHost::run`] performs
/// the calls once an evaluation has succeeded.
#[derive(Default)]
pub struct CapabilityHost {
    handlers: BTreeMap<String, Handler>,
}

impl CapabilityHost {
    /// Create an empty host
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a capability handler.
    pub fn register<F>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: FnMut(&Map<String, Value>) -> Result<()> + Send + 'static,
    {
        self.handlers.insert(name.into(), Box::new(handler));
        self
    }

    /// Registered capability names
    pub fn names(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    /// Execute instructions in order, stopping at the first failure.
    pub fn run(&mut self, instructions: &[Instruction]) -> Result<usize> {
        for (index, instruction) in instructions.iter().enumerate() {
            let handler = self
                .handlers
                .get_mut(&instruction.capability)
                .with_context(|| format!("capability '{}' is not registered", instruction.capability))?;

            handler(&instruction.args).with_context(|| {
                format!(
                    "instruction {} ('{}') failed",
                    index, instruction.capability
                )
            })?;
            tracing::debug!(capability = %instruction.capability, "executed instruction");
        }
        Ok(instructions.len())
    }
}

impl CapabilityCatalog for CapabilityHost {
    fn has_capability(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }
}

impl fmt::Debug for CapabilityHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityHost")
            .field("capabilities", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}
