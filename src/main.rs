mod cache;
mod config;
mod freshrelease;
mod logging;
mod resolve;
mod shell;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use freshrelease::client::FreshreleaseClient;
use freshrelease::types::{EntityKind, ProjectScope};
use resolve::Engine;

#[derive(Parser, Debug)]
#[command(name = "fresolve")]
#[command(about = "Resolve Freshrelease names to IDs and build filter queries")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/fresolve/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Project key or ID to use instead of the configured default
  #[arg(short, long)]
  project: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Resolve a name, email or key to its ID
  Resolve {
    /// user, issue_type, status, sprint, release, tag, subproject, project, issue
    kind: EntityKind,
    value: String,
  },
  /// Print the numeric ID of the project
  ProjectId,
  /// Print the numeric ID of an issue key like WEBAPP-12
  IssueId { key: String },
  /// Tell whether a field name is standard, custom or unknown
  Classify { field: String },
  /// List the project's custom fields
  Fields,
  /// Build a resolved filter query
  Filter {
    /// Free-form query, e.g. "status_id:Open, owner_id:jane@example.com"
    #[arg(short, long)]
    query: Option<String>,

    /// Individual field as NAME=VALUE; overrides the query (repeatable)
    #[arg(short, long = "field", value_parser = parse_field)]
    fields: Vec<(String, String)>,
  },
  /// Resolve a section path like "Checkout > Payments"
  Sections { path: String },
  /// Answer JSON-line requests on stdin until it closes
  Serve,
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
  raw
    .split_once('=')
    .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
    .filter(|(name, _)| !name.is_empty())
    .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))
}

fn print_json(value: &Value) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  let _guard = logging::init_logging(config.log_dir().as_deref())?;

  // Override project if specified on command line
  let default_project = match args.project.as_deref() {
    Some(raw) => Some(
      ProjectScope::parse(raw).ok_or_else(|| eyre!("--project must not be empty"))?,
    ),
    None => config.default_scope(),
  };

  let client = FreshreleaseClient::new(&config)?;
  let engine = Engine::new(Arc::new(client), default_project);

  match args.command {
    Command::Resolve { kind, value } => {
      let id = engine.resolve(None, kind, &Value::from(value)).await?;
      print_json(&id.to_json())?;
    }
    Command::ProjectId => {
      let id = engine.project_id(None).await?;
      print_json(&json!(id))?;
    }
    Command::IssueId { key } => {
      let id = engine.issue_id(None, &key).await?;
      print_json(&json!(id))?;
    }
    Command::Classify { field } => {
      let name = engine.classify(None, &field).await?;
      print_json(&shell::describe_field(&name))?;
    }
    Command::Fields => {
      let fields = engine.custom_fields(None).await?;
      print_json(&json!(fields))?;
    }
    Command::Filter { query, fields } => {
      let query = query.map(Value::from);
      let fields: BTreeMap<String, Value> = fields
        .into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect();
      let hash = engine.build_filter(None, query.as_ref(), &fields).await?;
      print_json(&shell::describe_filter(&hash))?;
    }
    Command::Sections { path } => {
      let ids = engine.resolve_section_path(None, &path).await?;
      print_json(&json!(ids))?;
    }
    Command::Serve => shell::serve(&engine).await?,
  }

  Ok(())
}
