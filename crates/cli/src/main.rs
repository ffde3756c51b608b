mod config;
mod logging;
mod output;
mod remote;

use std::path::PathBuf;
use std::process;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use conveyor_interchange::{ComponentKind, ComponentRef, InterchangeError};
use conveyor_migrate::{Engine, EngineError, MigrationOptions, SystemSpec};
use conveyor_storage::ComponentStore;
use serde::Serialize;

use crate::config::{Config, ConfigError};
use crate::remote::HttpComponentStore;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Containers a component listing can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GroupBy {
    /// Channels by channel group
    #[value(name = "channelGroup")]
    ChannelGroup,
    /// Code templates by code template library
    #[value(name = "codeTemplateLibrary")]
    CodeTemplateLibrary,
}

impl GroupBy {
    fn kind(self) -> ComponentKind {
        match self {
            GroupBy::ChannelGroup => ComponentKind::PipelineGroup,
            GroupBy::CodeTemplateLibrary => ComponentKind::ScriptLibrary,
        }
    }
}

/// Inspect and migrate channels and code templates between integration engine systems.
#[derive(Parser)]
#[command(
    name = "conveyor",
    version,
    about = "Inspect and migrate channels and code templates between integration engine systems"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true, default_value = "conveyor.toml")]
    config: PathBuf,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Log debug details to stderr
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured systems
    Systems,

    /// Print the engine version a system runs
    Version {
        system: String,
    },

    /// List a system's components by container
    List {
        system: String,
        /// Container kind to group by
        #[arg(long, default_value = "channelGroup", value_enum)]
        by: GroupBy,
    },

    /// Show metadata and content of one component (`kind:id`)
    Detail {
        system: String,
        component: String,
    },

    /// Compare a component with the same-named one on another system
    Diff {
        source: String,
        target: String,
        /// Component to compare (`kind:id`)
        component: String,
    },

    /// Report what would conflict when migrating components
    Conflicts {
        source: String,
        target: String,
        /// Components to check (`kind:id`)
        #[arg(required = true)]
        components: Vec<String>,
    },

    /// List the code templates channels call, transitively
    References {
        system: String,
        /// Channel ids
        #[arg(required = true)]
        channels: Vec<String>,
    },

    /// Migrate components from one system to another
    Migrate {
        source: String,
        target: String,
        /// Components to migrate (`kind:id`); groups, libraries and tags
        /// expand to their members
        #[arg(required = true)]
        components: Vec<String>,
        /// Also migrate the code templates the channels call
        #[arg(long)]
        with_templates: bool,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid component '{input}': {reason}")]
    Component { input: String, reason: String },

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.quiet, cli.verbose);

    match run(&cli) {
        Ok(code) => process::exit(code),
        Err(e) => {
            report_error(&e.to_string(), cli.output, cli.quiet);
            process::exit(1);
        }
    }
}

/// Runs one command; the returned code is the process exit status.
fn run(cli: &Cli) -> Result<i32, CliError> {
    let config = Config::load(&cli.config)?;

    match &cli.command {
        Commands::Systems => {
            emit(cli.output, &output::system_summaries(&config), || {
                output::systems(&config)
            })?;
            Ok(0)
        }
        Commands::Version { system } => {
            let engine = connect(&config, &[system])?;
            let version = engine.server_version(system)?;
            let text = version.map(|v| v.to_string()).unwrap_or_default();
            emit(cli.output, &version, || text.clone())?;
            engine.logout_all();
            Ok(0)
        }
        Commands::List { system, by } => {
            let engine = connect(&config, &[system])?;
            let tree = engine.list_components(system, by.kind())?;
            emit(cli.output, &tree, || output::tree(&tree))?;
            engine.logout_all();
            Ok(0)
        }
        Commands::Detail { system, component } => {
            let component = parse_component(component)?;
            let engine = connect(&config, &[system])?;
            let detail = engine.component_detail(system, component.kind, &component.id)?;
            emit(cli.output, &detail, || output::detail(&detail))?;
            engine.logout_all();
            Ok(0)
        }
        Commands::Diff {
            source,
            target,
            component,
        } => {
            let component = parse_component(component)?;
            let engine = connect(&config, &[source, target])?;
            let diff = engine.diff_component(source, target, &component)?;
            emit(cli.output, &diff, || diff.to_text())?;
            engine.logout_all();
            Ok(0)
        }
        Commands::Conflicts {
            source,
            target,
            components,
        } => {
            let refs = parse_components(components)?;
            let engine = connect(&config, &[source, target])?;
            let conflicts = engine.find_conflicts(source, target, &refs)?;
            emit(cli.output, &conflicts, || output::conflicts(&conflicts))?;
            engine.logout_all();
            Ok(0)
        }
        Commands::References { system, channels } => {
            let refs: Vec<ComponentRef> = channels
                .iter()
                .map(|id| ComponentRef::new(ComponentKind::Pipeline, id.as_str()))
                .collect();
            let engine = connect(&config, &[system])?;
            let templates = engine.referenced_templates(system, &refs)?;
            emit(cli.output, &templates, || output::references(&templates))?;
            engine.logout_all();
            Ok(0)
        }
        Commands::Migrate {
            source,
            target,
            components,
            with_templates,
        } => {
            let refs = parse_components(components)?;
            let engine = connect(&config, &[source, target])?;
            let options = MigrationOptions {
                include_referenced_templates: *with_templates,
            };
            let report = engine.migrate(source, target, &refs, options)?;
            emit(cli.output, &report, || output::migration(&report))?;
            engine.logout_all();
            Ok(if report.is_success() { 0 } else { 1 })
        }
    }
}

/// Build an engine over the named systems only, so that credentials of
/// systems the command does not touch are never required.
fn connect(config: &Config, names: &[&String]) -> Result<Engine, CliError> {
    let lifespan = Duration::from_secs(config.miscellaneous.session_lifespan_minutes * 60);
    let mut specs = Vec::new();
    for name in names {
        if specs.iter().any(|s: &SystemSpec| &s.name == *name) {
            continue;
        }
        let system = config.system(name)?;
        let password = system.resolve_password()?;
        let store: Arc<dyn ComponentStore> =
            Arc::new(HttpComponentStore::new(system, password, lifespan));
        specs.push(SystemSpec {
            name: system.name.clone(),
            fingerprint: system.fingerprint(),
            store,
        });
    }
    Ok(Engine::new(
        specs,
        config.exclude_from_function_detection.iter().cloned(),
    )?)
}

/// `kind:id`, where kind is a wire name such as `channel` or `codeTemplate`.
fn parse_component(input: &str) -> Result<ComponentRef, CliError> {
    let invalid = |reason: String| CliError::Component {
        input: input.to_string(),
        reason,
    };
    let (kind, id) = input
        .split_once(':')
        .ok_or_else(|| invalid("expected kind:id".to_string()))?;
    if id.trim().is_empty() {
        return Err(invalid("empty id".to_string()));
    }
    let kind = ComponentKind::from_str(kind.trim())
        .map_err(|e: InterchangeError| invalid(e.to_string()))?;
    Ok(ComponentRef::new(kind, id.trim()))
}

fn parse_components(inputs: &[String]) -> Result<Vec<ComponentRef>, CliError> {
    inputs.iter().map(|s| parse_component(s)).collect()
}

/// Print `value` as JSON, or the text rendering.
fn emit<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce() -> String,
) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
        OutputFormat::Text => println!("{}", text()),
    }
    Ok(())
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_kind_and_id() {
        let r = parse_component("codeTemplate:abc-1").unwrap();
        assert_eq!(r.kind, ComponentKind::ScriptTemplate);
        assert_eq!(r.id, "abc-1");
        assert_eq!(
            parse_component("CHANNEL:p1").unwrap().kind,
            ComponentKind::Pipeline
        );
    }

    #[test]
    fn rejects_malformed_components() {
        assert!(parse_component("p1").is_err());
        assert!(parse_component("channel:").is_err());
        let err = parse_component("widget:1").unwrap_err().to_string();
        assert!(err.contains("unknown component kind 'widget'"), "{err}");
    }

    #[test]
    fn group_by_maps_to_container_kinds() {
        assert_eq!(GroupBy::ChannelGroup.kind(), ComponentKind::PipelineGroup);
        assert_eq!(
            GroupBy::CodeTemplateLibrary.kind(),
            ComponentKind::ScriptLibrary
        );
    }
}
