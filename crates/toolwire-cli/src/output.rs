//! Rendering of command results.

use std::fmt::Write as _;
use std::str::FromStr;

use console::Style;
use serde::Serialize;
use toolwire_protocol::{
    CallToolResult, Content, Prompt, Resource, ServerCapabilities, ServerInfo, Tool,
};

use crate::config::Config;

/// Output format shared by all commands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Yaml,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            "yaml" => Ok(Self::Yaml),
            _ => Err(format!("Unknown format: {s}. Expected: text, json, yaml")),
        }
    }
}

/// Serializes `value` as pretty JSON or YAML.
pub fn to_structured<T: Serialize>(value: &T, format: OutputFormat) -> Result<String, String> {
    match format {
        OutputFormat::Yaml => serde_yaml::to_string(value).map_err(|e| e.to_string()),
        _ => serde_json::to_string_pretty(value)
            .map(|mut json| {
                json.push('\n');
                json
            })
            .map_err(|e| e.to_string()),
    }
}

/// Everything `inspect` learned about a server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub server: ServerInfo,
    pub protocol_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub capabilities: ServerCapabilities,
    pub tools: Vec<Tool>,
    pub prompts: Vec<Prompt>,
    pub resources: Vec<Resource>,
}

struct Palette {
    heading: Style,
    name: Style,
    dim: Style,
    error: Style,
}

impl Palette {
    fn new(colors: bool) -> Self {
        Self {
            heading: Style::new().bold().force_styling(colors),
            name: Style::new().cyan().force_styling(colors),
            dim: Style::new().dim().force_styling(colors),
            error: Style::new().red().bold().force_styling(colors),
        }
    }
}

fn capability_names(capabilities: &ServerCapabilities) -> Vec<&'static str> {
    [
        ("tools", capabilities.tools.is_some()),
        ("prompts", capabilities.prompts.is_some()),
        ("resources", capabilities.resources.is_some()),
        ("logging", capabilities.logging.is_some()),
    ]
    .into_iter()
    .filter_map(|(name, present)| present.then_some(name))
    .collect()
}

fn prompt_signature(prompt: &Prompt) -> String {
    let mut signature = prompt.name.clone();
    for argument in &prompt.arguments {
        if argument.required {
            let _ = write!(signature, " <{}>", argument.name);
        } else {
            let _ = write!(signature, " [{}]", argument.name);
        }
    }
    signature
}

/// Human-readable `inspect` output.
pub fn format_inspect_text(report: &InspectReport, colors: bool) -> String {
    let palette = Palette::new(colors);
    let mut out = String::new();

    let server = match &report.server.version {
        Some(version) => format!("{} v{version}", report.server.name),
        None => report.server.name.clone(),
    };
    let _ = writeln!(out, "Server: {}", palette.heading.apply_to(server));
    let _ = writeln!(out, "Protocol: {}", report.protocol_version);
    let capabilities = capability_names(&report.capabilities);
    let capabilities = if capabilities.is_empty() {
        "none".to_string()
    } else {
        capabilities.join(", ")
    };
    let _ = writeln!(out, "Capabilities: {capabilities}");
    if let Some(instructions) = &report.instructions {
        let _ = writeln!(out, "Instructions: {}", palette.dim.apply_to(instructions));
    }
    out.push('\n');

    if !report.tools.is_empty() {
        let _ = writeln!(out, "{}", palette.heading.apply_to(format!("Tools ({}):", report.tools.len())));
        for tool in &report.tools {
            let _ = write!(out, "  - {}", palette.name.apply_to(&tool.name));
            if let Some(desc) = tool.description.as_ref().or(tool.title.as_ref()) {
                let _ = write!(out, ": {desc}");
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !report.prompts.is_empty() {
        let _ = writeln!(out, "{}", palette.heading.apply_to(format!("Prompts ({}):", report.prompts.len())));
        for prompt in &report.prompts {
            let _ = write!(out, "  - {}", palette.name.apply_to(prompt_signature(prompt)));
            if let Some(desc) = &prompt.description {
                let _ = write!(out, ": {desc}");
            }
            out.push('\n');
        }
        out.push('\n');
    }

    if !report.resources.is_empty() {
        let _ = writeln!(out, "{}", palette.heading.apply_to(format!("Resources ({}):", report.resources.len())));
        for resource in &report.resources {
            let _ = write!(out, "  - {}", palette.name.apply_to(&resource.uri));
            if !resource.name.is_empty() {
                let _ = write!(out, " ({})", resource.name);
            }
            if let Some(mime) = &resource.mime_type {
                let _ = write!(out, " {}", palette.dim.apply_to(mime));
            }
            out.push('\n');
        }
        out.push('\n');
    }

    out
}

fn describe_content(content: &Content) -> String {
    match content {
        Content::Text { text } => text.clone(),
        Content::Image { data, mime_type } => format!("[image {mime_type}, {} base64 chars]", data.len()),
        Content::Audio { data, mime_type } => format!("[audio {mime_type}, {} base64 chars]", data.len()),
        Content::Resource { resource } => match &resource.text {
            Some(text) => text.clone(),
            None => format!("[resource {}]", resource.uri),
        },
        Content::ResourceLink { uri, .. } => format!("[link {uri}]"),
        Content::Unknown => "[unsupported content]".to_string(),
    }
}

/// Human-readable `call` output.
///
/// Content blocks are printed one per line. Structured content is shown only
/// when there are no blocks to print.
pub fn format_call_text(result: &CallToolResult, colors: bool) -> String {
    let palette = Palette::new(colors);
    let mut out = String::new();
    if result.is_error {
        let _ = writeln!(out, "{}", palette.error.apply_to("Tool reported an error:"));
    }
    for content in &result.content {
        out.push_str(&describe_content(content));
        out.push('\n');
    }
    if result.content.is_empty() {
        if let Some(structured) = &result.structured_content {
            out.push_str(&structured.to_pretty_string());
            out.push('\n');
        }
    }
    out
}

/// Human-readable `servers` output.
pub fn format_servers_text(config: &Config, colors: bool) -> String {
    let palette = Palette::new(colors);
    let width = config.servers.keys().map(|name| name.chars().count()).max().unwrap_or(0);
    let mut out = String::new();
    for (name, entry) in &config.servers {
        let padded = format!("{name:<width$}");
        let _ = write!(
            out,
            "{}  {}",
            palette.name.apply_to(padded),
            entry.launch.command_line()
        );
        if entry.disabled {
            let _ = write!(out, " {}", palette.dim.apply_to("(disabled)"));
        }
        out.push('\n');
    }
    out
}
