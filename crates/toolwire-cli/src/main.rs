//! toolwire CLI - talk to MCP servers over stdio.
//!
//! Commands:
//! - `inspect` - Show a server's tools, prompts and resources
//! - `call` - Call one tool and print its result
//! - `servers` - List servers defined in the config file

#![forbid(unsafe_code)]

mod config;
mod output;
mod trace;

use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use log::warn;

use toolwire_client::{
    CallToolResult, Client, ClientConfig, ClientError, ClientResult, StructuredValue,
};
use toolwire_core::logging::targets;
use toolwire_transport::ServerLaunch;

use crate::config::{Config, ConfigError};
use crate::output::{InspectReport, OutputFormat};
use crate::trace::TraceRenderer;

/// toolwire - Inspect and call MCP servers that speak JSON-RPC over stdio.
#[derive(Parser)]
#[command(name = "toolwire")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Server definitions file (default: ~/.config/toolwire/servers.toml).
    #[arg(long, short = 'c', global = true, env = "TOOLWIRE_CONFIG")]
    config: Option<PathBuf>,

    /// Print every message exchanged with the server to stderr.
    #[arg(long, global = true)]
    trace: bool,

    /// More log output (-v info, -vv debug, -vvv trace). RUST_LOG wins when set.
    #[arg(long, short = 'v', action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect an MCP server's capabilities.
    ///
    /// Connects to the server, lists its tools, prompts and resources,
    /// then displays them. Options go before the server command.
    Inspect {
        #[command(flatten)]
        target: Target,

        /// Output format (text, json, yaml).
        #[arg(long, short = 'f', default_value = "text")]
        format: OutputFormat,

        /// Output file (default: stdout).
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Call a tool and print its result.
    ///
    /// Exits with a failure status when the tool reports an error.
    /// Options go before the server command.
    Call {
        #[command(flatten)]
        target: Target,

        /// Name of the tool to call.
        #[arg(long, short = 't')]
        tool: String,

        /// Tool arguments as a JSON object.
        #[arg(long = "args", short = 'a', value_name = "JSON")]
        arguments: Option<String>,

        /// Output format (text, json, yaml).
        #[arg(long, short = 'f', default_value = "text")]
        format: OutputFormat,
    },

    /// List servers defined in the config file.
    Servers {
        /// Output format (text, json, yaml).
        #[arg(long, short = 'f', default_value = "text")]
        format: OutputFormat,
    },
}

/// Which server to start and how.
#[derive(Args, Debug, Clone)]
struct Target {
    /// Server command or path.
    #[arg(required_unless_present = "profile", conflicts_with = "profile")]
    server: Option<String>,

    /// Arguments to pass to the server.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    args: Vec<String>,

    /// Use a server defined in the config file.
    #[arg(long, short = 'p')]
    profile: Option<String>,

    /// Working directory for the server.
    #[arg(long, short = 'C')]
    cwd: Option<PathBuf>,

    /// Environment variables (KEY=VALUE format).
    #[arg(long, short = 'e', value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Seconds to wait for each server response.
    #[arg(long, default_value_t = 30)]
    timeout: u64,
}

impl Target {
    /// Builds the launch definition, layering `-C` and `-e` over a profile.
    fn resolve(&self, config_path: Option<&Path>) -> Result<ServerLaunch, CliError> {
        let mut launch = match (&self.profile, &self.server) {
            (Some(profile), _) => Config::discover(config_path)?.0.server(profile)?.clone(),
            (None, Some(server)) => ServerLaunch::new(server.as_str()).args(self.args.iter().cloned()),
            (None, None) => return Err(CliError::Usage("a server command or --profile is required")),
        };
        if let Some(cwd) = &self.cwd {
            launch = launch.cwd(cwd);
        }
        for (key, value) in &self.env {
            launch = launch.env(key.as_str(), value.as_str());
        }
        Ok(launch)
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Usage(&'static str),

    #[error("invalid tool arguments: {0}")]
    Arguments(String),

    #[error("no response within {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to render output: {0}")]
    Render(String),

    #[error("tool `{0}` reported an error")]
    ToolFailed(String),
}

/// Parses `--args` into tool arguments. Only JSON objects are accepted.
fn parse_tool_arguments(raw: Option<&str>) -> Result<Option<StructuredValue>, CliError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| CliError::Arguments(e.to_string()))?;
    if !value.is_object() {
        return Err(CliError::Arguments(format!(
            "expected a JSON object, got `{raw}`"
        )));
    }
    Ok(Some(StructuredValue::from_dynamic(value)))
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_millis()
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Inspect {
            target,
            format,
            output,
        } => cmd_inspect(cli.config.as_deref(), cli.trace, &target, format, output.as_deref()).await,
        Commands::Call {
            target,
            tool,
            arguments,
            format,
        } => cmd_call(cli.config.as_deref(), cli.trace, &target, &tool, arguments.as_deref(), format).await,
        Commands::Servers { format } => cmd_servers(cli.config.as_deref(), format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn new_client(trace: bool) -> Client {
    let client = Client::new(ClientConfig::default());
    if trace {
        client.with_observer(TraceRenderer::detect().into_observer())
    } else {
        client
    }
}

/// Awaits one client operation, giving up after `limit`.
async fn within<T>(
    limit: Duration,
    operation: impl Future<Output = ClientResult<T>>,
) -> Result<T, CliError> {
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(CliError::Timeout(limit)),
    }
}

/// Treats a JSON-RPC error from a listing as "nothing to list".
fn tolerate_server_error<T: Default>(listing: &str, result: Result<T, CliError>) -> Result<T, CliError> {
    match result {
        Err(CliError::Client(ClientError::Server { code, message, .. })) => {
            warn!(target: targets::CLIENT, "{listing} failed ({code}): {message}");
            Ok(T::default())
        }
        other => other,
    }
}

fn emit(text: &str, output: Option<&Path>) -> Result<(), CliError> {
    match output {
        Some(path) => std::fs::write(path, text).map_err(|source| CliError::Write {
            path: path.to_path_buf(),
            source,
        }),
        None => {
            print!("{text}");
            io::stdout().flush().ok();
            Ok(())
        }
    }
}

/// Inspect command: Connect to a server and display its capabilities.
async fn cmd_inspect(
    config: Option<&Path>,
    trace: bool,
    target: &Target,
    format: OutputFormat,
    output: Option<&Path>,
) -> Result<(), CliError> {
    let launch = target.resolve(config)?;
    let mut client = new_client(trace);
    let report = inspect(&mut client, launch, target.timeout()).await;
    client.disconnect().await;
    let report = report?;

    let text = match format {
        OutputFormat::Text => output::format_inspect_text(&report, output.is_none() && console::colors_enabled()),
        _ => output::to_structured(&report, format).map_err(CliError::Render)?,
    };
    emit(&text, output)
}

async fn inspect(
    client: &mut Client,
    launch: ServerLaunch,
    limit: Duration,
) -> Result<InspectReport, CliError> {
    let session = within(limit, client.connect(launch)).await?.clone();
    let capabilities = session.server_capabilities();

    let tools = if capabilities.tools.is_some() {
        tolerate_server_error("tools/list", within(limit, client.list_tools()).await)?
    } else {
        Vec::new()
    };
    let prompts = if capabilities.prompts.is_some() {
        tolerate_server_error("prompts/list", within(limit, client.list_prompts()).await)?
    } else {
        Vec::new()
    };
    let resources = if capabilities.resources.is_some() {
        tolerate_server_error("resources/list", within(limit, client.list_resources()).await)?
    } else {
        Vec::new()
    };

    Ok(InspectReport {
        server: session.server_info().clone(),
        protocol_version: session.protocol_version().to_string(),
        instructions: session.instructions().map(str::to_string),
        capabilities: capabilities.clone(),
        tools,
        prompts,
        resources,
    })
}

/// Call command: Invoke one tool and print what it returned.
async fn cmd_call(
    config: Option<&Path>,
    trace: bool,
    target: &Target,
    tool: &str,
    args: Option<&str>,
    format: OutputFormat,
) -> Result<(), CliError> {
    let arguments = parse_tool_arguments(args)?;
    let launch = target.resolve(config)?;
    let limit = target.timeout();

    let mut client = new_client(trace);
    let result = call(&mut client, launch, tool, arguments, limit).await;
    client.disconnect().await;
    let result = result?;

    let text = match format {
        OutputFormat::Text => output::format_call_text(&result, console::colors_enabled()),
        _ => output::to_structured(&result, format).map_err(CliError::Render)?,
    };
    emit(&text, None)?;

    if result.is_error {
        return Err(CliError::ToolFailed(tool.to_string()));
    }
    Ok(())
}

async fn call(
    client: &mut Client,
    launch: ServerLaunch,
    tool: &str,
    arguments: Option<StructuredValue>,
    limit: Duration,
) -> Result<CallToolResult, CliError> {
    within(limit, client.connect(launch)).await?;
    within(limit, client.call_tool(tool, arguments)).await
}

/// Servers command: List the definitions in the config file.
fn cmd_servers(config: Option<&Path>, format: OutputFormat) -> Result<(), CliError> {
    let (config, path) = Config::discover(config)?;

    match format {
        OutputFormat::Text if config.servers.is_empty() => {
            match path {
                Some(path) => println!("No servers configured in {}.", path.display()),
                None => println!("No servers configured."),
            }
            Ok(())
        }
        OutputFormat::Text => emit(
            &output::format_servers_text(&config, console::colors_enabled()),
            None,
        ),
        _ => emit(
            &output::to_structured(&config, format).map_err(CliError::Render)?,
            None,
        ),
    }
}
