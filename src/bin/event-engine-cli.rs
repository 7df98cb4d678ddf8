//! Event Engine CLI - Command-line interface for the event engine
//!
//! Loads modeling metadata into a registry, then inspects it, builds messages
//! from it, or folds events into aggregate state.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use event_engine::messaging::{Envelope, MessageKind, Meta};
use event_engine::runtime::storage::{self, Storage};
use event_engine::runtime::{Engine, EngineConfig};
use serde_json::Value;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "event-engine")]
#[command(about = "Schema-validated messages and rule-driven state transitions", long_about = None)]
struct Cli {
    /// Engine directory holding config.json and metadata.json
    #[arg(short, long, default_value = ".event-engine")]
    root: PathBuf,

    /// Metadata file (defaults to <root>/metadata.json)
    #[arg(short, long)]
    metadata: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Kind {
    Command,
    Event,
    Query,
    Information,
}

impl From<Kind> for MessageKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::Command => MessageKind::Command,
            Kind::Event => MessageKind::Event,
            Kind::Query => MessageKind::Query,
            Kind::Information => MessageKind::ValueObject,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init,

    /// List registered messages, aggregates and policies
    Inspect,

    /// Build a validated message
    Make {
        /// Message kind
        #[arg(value_enum)]
        kind: Kind,

        /// Message name
        name: String,

        /// Payload as JSON
        #[arg(long, default_value = "{}")]
        payload: String,

        /// Metadata as a JSON object
        #[arg(long)]
        meta: Option<String>,
    },

    /// Fold events into aggregate state
    Apply {
        /// Aggregate name
        aggregate: String,

        /// File holding an event envelope or an array of them
        events: PathBuf,

        /// Prior state as JSON
        #[arg(long)]
        state: Option<String>,
    },

    /// Write the registry snapshot
    Export {
        /// Output path (defaults to <root>/registry.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let layout = Storage::new(cli.root.clone());
    let config = storage::load_config(layout.root())?;

    // Initialize tracing
    let level = if config.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    if let Commands::Init = cli.command {
        storage::init_storage(layout.root())?;
        storage::write_config(layout.root(), &EngineConfig::default())?;
        println!("Initialized event engine at {:?}", layout.root());
        return Ok(());
    }

    let engine = Engine::new(config);
    let metadata = cli.metadata.unwrap_or_else(|| layout.metadata_path());
    let actions = storage::load_metadata(&metadata)?;
    engine
        .load(actions)
        .with_context(|| format!("Failed to load metadata {:?}", metadata))?;

    match cli.command {
        Commands::Init => {}
        Commands::Inspect => {
            let snapshot = engine.snapshot();
            for (label, kind) in [
                ("Commands", MessageKind::Command),
                ("Events", MessageKind::Event),
                ("Queries", MessageKind::Query),
                ("Information", MessageKind::ValueObject),
            ] {
                println!("{label}:");
                for name in snapshot.names(kind) {
                    println!("  {name}");
                }
            }

            println!("Aggregates:");
            for (name, aggregate) in &snapshot.config().aggregates {
                let events = snapshot
                    .config()
                    .apply_rules
                    .get(name)
                    .map(|reducers| reducers.keys().cloned().collect::<Vec<_>>().join(", "))
                    .unwrap_or_default();
                println!("  {name} (state: {}, events: {events})", aggregate.state);
            }

            println!("Policies:");
            for (event, policies) in &snapshot.config().event_policies {
                for name in policies.keys() {
                    println!("  {name} <- {event}");
                }
            }
        }
        Commands::Make {
            kind,
            name,
            payload,
            meta,
        } => {
            let payload = parse_json("payload", &payload)?;
            let factory = engine.factory(kind.into(), &name)?;

            let output = if factory.kind().is_envelope() {
                let meta = meta
                    .map(|text| {
                        serde_json::from_str::<Meta>(&text).context("Failed to parse --meta as a JSON object")
                    })
                    .transpose()?;
                serde_json::to_value(factory.make(payload, meta)?)?
            } else {
                factory.make_value(payload)?
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        Commands::Apply {
            aggregate,
            events,
            state,
        } => {
            let data = std::fs::read(&events).with_context(|| format!("Failed to read events: {:?}", events))?;
            let events: Vec<Envelope> = match serde_json::from_slice::<Value>(&data)? {
                Value::Array(items) => serde_json::from_value(Value::Array(items))?,
                single => vec![serde_json::from_value(single)?],
            };
            let prior = state.map(|text| parse_json("state", &text)).transpose()?;

            let state = engine.fold_events(&aggregate, &events, prior)?;
            println!("{}", serde_json::to_string_pretty(&state.unwrap_or(Value::Null))?);
        }
        Commands::Export { output } => {
            let path = output.unwrap_or_else(|| layout.snapshot_path());
            storage::write_snapshot(&path, &engine.store().export())?;
            println!("Wrote registry snapshot to {:?}", path);
        }
    }

    Ok(())
}

fn parse_json(what: &str, text: &str) -> Result<Value> {
    serde_json::from_str(text).with_context(|| format!("Failed to parse --{what} as JSON"))
}
