//! Named server definitions.
//!
//! The file is TOML by default and JSON when its extension is `.json`, so an
//! existing MCP client config can be pointed at directly:
//!
//! ```toml
//! [servers.files]
//! command = "npx"
//! args = ["-y", "@modelcontextprotocol/server-filesystem", "/tmp"]
//!
//! [servers.files.env]
//! DEBUG = "1"
//! ```
//!
//! Definitions may live under `servers` or `mcpServers`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use toolwire_transport::ServerLaunch;

/// Errors loading or querying the server config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("no server named `{name}` (configured: {})", list_or_none(.available))]
    UnknownServer { name: String, available: Vec<String> },

    #[error("server `{0}` is disabled")]
    Disabled(String),
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}

/// One named server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(flatten)]
    pub launch: ServerLaunch,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub disabled: bool,
}

/// Contents of a server config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, ServerEntry>,
}

impl Config {
    /// `<config dir>/toolwire/servers.toml`, e.g. `~/.config/toolwire/servers.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("toolwire").join("servers.toml"))
    }

    /// Reads and parses one file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(content).map_err(|e| parse_error(e.to_string())),
            _ => toml::from_str(content).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// Loads `explicit` if given. Otherwise loads the default file, treating a
    /// missing one as an empty config.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), ConfigError> {
        if let Some(path) = explicit {
            return Ok((Self::load(path)?, Some(path.to_path_buf())));
        }
        match Self::default_path() {
            Some(path) if path.is_file() => Ok((Self::load(&path)?, Some(path))),
            path => Ok((Self::default(), path)),
        }
    }

    /// Returns the launch definition for an enabled server.
    pub fn server(&self, name: &str) -> Result<&ServerLaunch, ConfigError> {
        match self.servers.get(name) {
            Some(entry) if entry.disabled => Err(ConfigError::Disabled(name.to_string())),
            Some(entry) => Ok(&entry.launch),
            None => Err(ConfigError::UnknownServer {
                name: name.to_string(),
                available: self.servers.keys().cloned().collect(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOML: &str = r#"
[servers.files]
command = "npx"
args = ["-y", "server-filesystem", "/tmp"]
cwd = "/srv"

[servers.files.env]
DEBUG = "1"

[servers.old]
command = "/usr/local/bin/old-server"
disabled = true
"#;

    #[test]
    fn parses_toml_servers() {
        let config = Config::parse(Path::new("servers.toml"), TOML).unwrap();
        let files = config.server("files").unwrap();
        assert_eq!(files.command, "npx");
        assert_eq!(files.args, ["-y", "server-filesystem", "/tmp"]);
        assert_eq!(files.env.get("DEBUG").map(String::as_str), Some("1"));
        assert_eq!(files.cwd.as_deref(), Some(Path::new("/srv")));
    }

    #[test]
    fn disabled_server_is_refused() {
        let config = Config::parse(Path::new("servers.toml"), TOML).unwrap();
        assert!(matches!(config.server("old"), Err(ConfigError::Disabled(name)) if name == "old"));
    }

    #[test]
    fn unknown_server_lists_known_names() {
        let config = Config::parse(Path::new("servers.toml"), TOML).unwrap();
        let err = config.server("nope").unwrap_err();
        assert_eq!(
            err.to_string(),
            "no server named `nope` (configured: files, old)"
        );
        let empty = Config::default().server("nope").unwrap_err();
        assert!(empty.to_string().ends_with("(configured: none)"));
    }

    #[test]
    fn json_files_accept_mcp_servers_key() {
        let json = r#"{"mcpServers":{"git":{"command":"uvx","args":["mcp-server-git"]}}}"#;
        let config = Config::parse(Path::new("claude_desktop_config.json"), json).unwrap();
        let git = config.server("git").unwrap();
        assert_eq!(git.command, "uvx");
        assert_eq!(git.args, ["mcp-server-git"]);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let err = Config::parse(Path::new("broken.toml"), "[servers.x]\ncommand = ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse broken.toml"));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        let err = Config::discover(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.toml");
        std::fs::write(&path, TOML).unwrap();
        let (config, found) = Config::discover(Some(&path)).unwrap();
        assert_eq!(found.as_deref(), Some(path.as_path()));
        assert_eq!(config.servers.len(), 2);
    }
}
