//! Action-driven runtime registry
//!
//! A single writer folds [`RegistryAction`]s into a fresh copy of the
//! current [`RegistryState`] and swaps it in as one unit. Readers take
//! `Arc` snapshots and never observe a half-applied action; a failed action
//! leaves the previous state in place. Validators are compiled into a staged
//! copy of the cache and only published together with the new state.

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use super::action::RegistryAction;
use super::error::{RegistryError, RegistryResult};
use super::state::{RegistryConfig, RegistryState, RuntimeInfo};
use crate::interpreter::{
    NoCapabilities, Rule, RuleContext, RuleError, always_map_payload, evaluate,
};
use crate::messaging::{MessageDescriptor, MessageFactory, MessageKind};
use crate::schema::{ValidatorCache, contains_ref, ensure_refs_known};

const KINDS: [MessageKind; 4] = [
    MessageKind::Command,
    MessageKind::Event,
    MessageKind::Query,
    MessageKind::ValueObject,
];

/// Shared handle to the registry
#[derive(Debug)]
pub struct RegistryStore {
    state: RwLock<Arc<RegistryState>>,
    validators: Arc<ValidatorCache>,
}

impl RegistryStore {
    /// Empty store compiling with the default draft
    pub fn new() -> Self {
        Self::with_validators(Arc::new(ValidatorCache::default()))
    }

    /// Empty store compiling through an existing validator cache
    pub fn with_validators(validators: Arc<ValidatorCache>) -> Self {
        Self {
            state: RwLock::new(Arc::new(RegistryState::default())),
            validators,
        }
    }

    /// Current complete state
    pub fn snapshot(&self) -> Arc<RegistryState> {
        Arc::clone(&self.state.read())
    }

    /// Validator cache shared by every factory of this store
    pub fn validators(&self) -> &Arc<ValidatorCache> {
        &self.validators
    }

    /// Apply one action, returning the new revision.
    pub fn dispatch(&self, action: RegistryAction) -> RegistryResult<u64> {
        self.dispatch_all(std::iter::once(action))
    }

    /// Apply a batch of actions as one unit.
    ///
    /// Either every action is applied or, on the first failure, none is; the
    /// validator cache is left as it was too.
    pub fn dispatch_all<I>(&self, actions: I) -> RegistryResult<u64>
    where
        I: IntoIterator<Item = RegistryAction>,
    {
        let guard = self.state.upgradable_read();
        let mut next = (**guard).clone();
        let staged = self.validators.stage();

        for action in actions {
            let kind = action.kind();
            let name = action.name().unwrap_or("*").to_string();
            if let Err(err) = apply(&mut next, action, &staged) {
                tracing::warn!(action = kind, name = %name, error = %err, "rejected registry action");
                return Err(err);
            }
            tracing::debug!(action = kind, name = %name, "applied registry action");
        }

        let revision = next.revision;
        let mut state = RwLockUpgradableReadGuard::upgrade(guard);
        self.validators.publish(
            staged,
            next.factories.values().map(|factory| factory.validator().identity()),
        );
        *state = Arc::new(next);
        tracing::info!(revision, "registry updated");
        Ok(revision)
    }

    /// Serializable metadata, usable as an `INIT` payload.
    pub fn export(&self) -> RegistryConfig {
        self.snapshot().config.clone()
    }
}

impl Default for RegistryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure reducer: the state following `action`, or an error leaving `state` untouched.
///
/// Validators are compiled into `cache` directly; pass a [`ValidatorCache::stage`]d
/// copy to keep a shared cache out of it.
pub fn reduce(
    state: &RegistryState,
    action: RegistryAction,
    cache: &ValidatorCache,
) -> RegistryResult<RegistryState> {
    let mut next = state.clone();
    apply(&mut next, action, cache)?;
    Ok(next)
}

fn apply(next: &mut RegistryState, action: RegistryAction, cache: &ValidatorCache) -> RegistryResult<()> {
    match action {
        RegistryAction::Init { payload } => {
            let revision = next.revision;
            *next = initialize(payload, cache)?;
            next.revision = revision;
        }
        RegistryAction::AddPage { name, page } => {
            next.config.pages.insert(name, page);
        }
        RegistryAction::AddCommand { name, command } => {
            register_info(next, MessageKind::Command, &name, command, cache)?;
        }
        RegistryAction::AddType {
            name,
            information,
            definition,
        } => {
            ensure_refs_known(&definition.definition_id, &definition.schema, next.definitions())
                .map_err(|source| RegistryError::Schema {
                    name: name.clone(),
                    source,
                })?;
            next.config
                .schema_definitions
                .insert(definition.definition_id, definition.schema);
            register_info(next, MessageKind::ValueObject, &name, information, cache)?;
            recompile_dependents(next, &name, cache)?;
        }
        RegistryAction::AddQuery {
            name,
            query,
            resolver,
        } => {
            register_info(next, MessageKind::Query, &name, query, cache)?;
            next.config.resolvers.insert(name, resolver);
        }
        RegistryAction::AddAggregate {
            name,
            command,
            aggregate,
            business_rules,
        } => {
            if aggregate.name != name {
                return Err(conflict(
                    &name,
                    format!("aggregate description is named '{}'", aggregate.name),
                ));
            }
            if let Some(kind) = next.kind_of(&command) {
                if kind != MessageKind::Command {
                    return Err(conflict(&command, format!("already registered as {kind}")));
                }
            }
            if let Some(info) = next.info(MessageKind::Command, &command) {
                check_owner(&command, &info.desc, &name)?;
            }
            next.config.aggregates.insert(name, aggregate);
            next.config.command_handlers.insert(command, business_rules);
        }
        RegistryAction::AddAggregateEvent {
            name,
            aggregate,
            event,
            reducer,
        } => {
            check_owner(&name, &event.desc, &aggregate)?;
            let claimed = next
                .config
                .apply_rules
                .iter()
                .find(|(owner, reducers)| **owner != aggregate && reducers.contains_key(&name))
                .map(|(owner, _)| owner.clone());
            if let Some(owner) = claimed {
                return Err(conflict(&name, format!("already applied by aggregate '{owner}'")));
            }
            reject_capabilities(&name, &reducer)?;

            register_info(next, MessageKind::Event, &name, event, cache)?;
            next.config
                .apply_rules
                .entry(aggregate)
                .or_default()
                .insert(name, reducer_or_default(reducer));
        }
        RegistryAction::AddEventPolicy { name, event, desc } => {
            if desc.name != name {
                return Err(conflict(&name, format!("policy description is named '{}'", desc.name)));
            }
            next.config
                .event_policies
                .entry(event)
                .or_default()
                .insert(name, desc);
        }
    }

    next.revision += 1;
    Ok(())
}

fn initialize(mut config: RegistryConfig, cache: &ValidatorCache) -> RegistryResult<RegistryState> {
    for reducers in config.apply_rules.values_mut() {
        for (event, rules) in reducers.iter_mut() {
            reject_capabilities(event, rules)?;
            if rules.is_empty() {
                rules.push(always_map_payload());
            }
        }
    }

    for (id, schema) in &config.schema_definitions {
        ensure_refs_known(id, schema, &config.schema_definitions).map_err(|source| RegistryError::Schema {
            name: id.clone(),
            source,
        })?;
    }

    let mut owners: BTreeMap<&str, MessageKind> = BTreeMap::new();
    for kind in KINDS {
        for (name, info) in config.infos(kind) {
            check_info(kind, name, info)?;
            if let Some(other) = owners.insert(name.as_str(), kind) {
                return Err(conflict(name, format!("registered as both {other} and {kind}")));
            }
        }
    }

    let mut factories = std::collections::HashMap::new();
    for kind in KINDS {
        for (name, info) in config.infos(kind) {
            let factory = build_factory(name, info, &config.schema_definitions, cache)?;
            factories.insert((kind, name.clone()), Arc::new(factory));
        }
    }

    Ok(RegistryState {
        config,
        factories,
        revision: 0,
    })
}

fn register_info(
    next: &mut RegistryState,
    kind: MessageKind,
    name: &str,
    info: RuntimeInfo,
    cache: &ValidatorCache,
) -> RegistryResult<()> {
    check_info(kind, name, &info)?;
    if let Some(other) = next.kind_of(name) {
        if other != kind {
            return Err(conflict(name, format!("already registered as {other}")));
        }
    }

    let factory = build_factory(name, &info, next.definitions(), cache)?;
    next.config.infos_mut(kind).insert(name.to_string(), info);
    next.factories
        .insert((kind, name.to_string()), Arc::new(factory));
    Ok(())
}

/// Rebuild every factory whose schema goes through the definition registry.
fn recompile_dependents(next: &mut RegistryState, changed: &str, cache: &ValidatorCache) -> RegistryResult<()> {
    let mut rebuilt = Vec::new();
    for kind in KINDS {
        for (name, info) in next.config.infos(kind) {
            if name == changed || !contains_ref(&info.schema) {
                continue;
            }
            let factory = build_factory(name, info, next.definitions(), cache)?;
            rebuilt.push(((kind, name.clone()), Arc::new(factory)));
        }
    }

    if !rebuilt.is_empty() {
        tracing::debug!(definition = changed, dependents = rebuilt.len(), "recompiled dependent schemas");
    }
    next.factories.extend(rebuilt);
    Ok(())
}

fn check_info(kind: MessageKind, name: &str, info: &RuntimeInfo) -> RegistryResult<()> {
    if info.desc.name != name {
        return Err(conflict(name, format!("descriptor is named '{}'", info.desc.name)));
    }
    if info.desc.kind != kind {
        return Err(conflict(
            name,
            format!("descriptor kind is {} but registered as {kind}", info.desc.kind),
        ));
    }
    reject_capabilities(name, &info.factory)
}

fn check_owner(name: &str, desc: &MessageDescriptor, aggregate: &str) -> RegistryResult<()> {
    match &desc.aggregate_name {
        Some(owner) if owner != aggregate => Err(conflict(
            name,
            format!("belongs to aggregate '{owner}', not '{aggregate}'"),
        )),
        _ => Ok(()),
    }
}

fn build_factory(
    name: &str,
    info: &RuntimeInfo,
    definitions: &crate::schema::DefinitionRegistry,
    cache: &ValidatorCache,
) -> RegistryResult<MessageFactory> {
    let factory = MessageFactory::new(info.desc.kind, name, &info.schema, definitions, cache).map_err(
        |source| RegistryError::Schema {
            name: name.to_string(),
            source,
        },
    )?;

    let identifier = generated_identifier(&info.desc);
    if info.factory.is_empty() && identifier.is_none() {
        return Ok(factory);
    }

    let rules = info.factory.clone();
    Ok(factory.with_init(move |data| prepare(identifier.as_deref(), &rules, data)))
}

/// Field that receives a fresh UUID when the payload leaves it out.
fn generated_identifier(desc: &MessageDescriptor) -> Option<String> {
    match desc.kind {
        MessageKind::ValueObject if desc.has_identifier && !desc.is_list => desc.identifier.clone(),
        MessageKind::Command if desc.new_aggregate => desc.aggregate_identifier_field.clone(),
        _ => None,
    }
}

fn prepare(identifier: Option<&str>, rules: &[Rule], mut data: Value) -> Result<Value, String> {
    if let (Some(field), Value::Object(fields)) = (identifier, &mut data) {
        fields
            .entry(field)
            .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
    }
    if rules.is_empty() {
        return Ok(data);
    }

    let context = RuleContext::new(data.clone()).with_state(data.clone());
    match evaluate(rules, &context, &NoCapabilities) {
        Ok(evaluation) => Ok(evaluation.state.unwrap_or(data)),
        Err(RuleError::NoMatchingRule) => Ok(data),
        Err(err) => Err(err.to_string()),
    }
}

fn reducer_or_default(reducer: Vec<Rule>) -> Vec<Rule> {
    if reducer.is_empty() {
        vec![always_map_payload()]
    } else {
        reducer
    }
}

/// Reducers and factory rules run without a host; `execute` can never succeed there.
fn reject_capabilities(name: &str, rules: &[Rule]) -> RegistryResult<()> {
    match find_capability(rules) {
        Some(capability) => Err(RegistryError::Rules {
            name: name.to_string(),
            source: RuleError::UnknownCapability(capability.to_string()),
        }),
        None => Ok(()),
    }
}

fn find_capability(rules: &[Rule]) -> Option<&str> {
    rules.iter().find_map(|rule| match rule {
        Rule::Execute { capability, .. } => Some(capability.as_str()),
        Rule::Sequence { rules } => find_capability(rules),
        Rule::Condition { then, otherwise, .. } => then
            .as_deref()
            .and_then(find_capability)
            .or_else(|| otherwise.as_deref().and_then(find_capability)),
        Rule::Assign { .. } | Rule::MapPayload { .. } => None,
    })
}

fn conflict(name: &str, detail: String) -> RegistryError {
    RegistryError::Conflict {
        name: name.to_string(),
        detail,
    }
}
