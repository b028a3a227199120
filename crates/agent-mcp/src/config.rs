use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use crate::error::{McpError, Result};

/// Root MCP configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct McpConfig {
    /// Servers keyed by name. Ordered so connection order is deterministic.
    #[serde(default, alias = "mcpServers")]
    pub servers: BTreeMap<String, McpServerConfig>,
}

impl McpConfig {
    /// Loads a config file. `.yaml`/`.yml` files are read as YAML, anything
    /// else as JSON.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            McpError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;

        let is_yaml = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"));

        if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| McpError::InvalidConfig(format!("{}: {}", path.display(), e)))
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| McpError::InvalidConfig(format!("{}: {}", path.display(), e)))
        }
    }

    pub fn enabled_servers(&self) -> impl Iterator<Item = (&String, &McpServerConfig)> {
        self.servers.iter().filter(|(_, server)| server.enabled)
    }
}

/// Single MCP server configuration.
///
/// Exactly one of `command` and `url` is meaningful: a command selects the
/// stdio transport, a URL selects the HTTP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Extra HTTP headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// How long a stdio server gets to exit after stdin closes before it is killed
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_shutdown_grace() -> u64 {
    5000 // 5 seconds
}

fn default_connect_timeout() -> u64 {
    10000 // 10 seconds
}

impl Default for McpServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
            url: None,
            headers: HashMap::new(),
            shutdown_grace_ms: default_shutdown_grace(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl McpServerConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Resolves which transport this entry describes.
    pub fn transport(&self) -> Result<TransportConfig> {
        let command = self.command.as_deref().map(str::trim).unwrap_or_default();
        let url = self.url.as_deref().map(str::trim).unwrap_or_default();

        if !command.is_empty() {
            if !url.is_empty() {
                tracing::warn!(
                    command,
                    url,
                    "MCP server has both command and url; using stdio"
                );
            }
            return Ok(TransportConfig::Stdio(StdioConfig {
                command: command.to_string(),
                args: self.args.clone(),
                cwd: self.cwd.clone(),
                env: self.env.clone(),
                shutdown_grace_ms: self.shutdown_grace_ms,
            }));
        }

        if !url.is_empty() {
            return Ok(TransportConfig::Http(HttpConfig {
                url: url.to_string(),
                headers: self.headers.clone(),
                connect_timeout_ms: self.connect_timeout_ms,
            }));
        }

        Err(McpError::InvalidConfig(
            "either command or url must be set".to_string(),
        ))
    }
}

/// Transport configuration variants
#[derive(Debug, Clone)]
pub enum TransportConfig {
    Stdio(StdioConfig),
    Http(HttpConfig),
}

/// Stdio transport configuration
#[derive(Debug, Clone)]
pub struct StdioConfig {
    pub command: String,
    pub args: Vec<String>,
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub shutdown_grace_ms: u64,
}

/// HTTP transport configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub url: String,
    pub headers: HashMap<String, String>,
    pub connect_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn command_selects_stdio() {
        let config = McpServerConfig::stdio("npx", vec!["server".to_string()]);
        match config.transport().unwrap() {
            TransportConfig::Stdio(stdio) => {
                assert_eq!(stdio.command, "npx");
                assert_eq!(stdio.args, vec!["server"]);
                assert_eq!(stdio.shutdown_grace_ms, 5000);
            }
            other => panic!("expected stdio, got {other:?}"),
        }
    }

    #[test]
    fn url_selects_http() {
        let config = McpServerConfig::http("http://localhost:3000/mcp");
        assert!(matches!(
            config.transport().unwrap(),
            TransportConfig::Http(http) if http.url == "http://localhost:3000/mcp"
        ));
    }

    #[test]
    fn command_wins_over_url() {
        let config = McpServerConfig {
            url: Some("http://localhost/mcp".to_string()),
            ..McpServerConfig::stdio("server-bin", Vec::new())
        };
        assert!(matches!(config.transport().unwrap(), TransportConfig::Stdio(_)));
    }

    #[test]
    fn blank_entry_is_rejected() {
        let config = McpServerConfig {
            command: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.transport(),
            Err(McpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn parses_conventional_json_layout() {
        let config: McpConfig = serde_json::from_str(
            r#"{
                "mcpServers": {
                    "zeta": {"url": "http://localhost:9000/mcp"},
                    "alpha": {"command": "alpha-server", "args": ["--stdio"], "env": {"TOKEN": "x"}}
                }
            }"#,
        )
        .unwrap();

        let names: Vec<&String> = config.servers.keys().collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        let alpha = &config.servers["alpha"];
        assert!(alpha.enabled);
        assert_eq!(alpha.env.get("TOKEN").map(String::as_str), Some("x"));
    }

    #[test]
    fn enabled_servers_skips_disabled() {
        let mut config = McpConfig::default();
        config
            .servers
            .insert("on".to_string(), McpServerConfig::stdio("a", Vec::new()));
        config.servers.insert(
            "off".to_string(),
            McpServerConfig {
                enabled: false,
                ..McpServerConfig::stdio("b", Vec::new())
            },
        );

        let names: Vec<&String> = config.enabled_servers().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["on"]);
    }

    #[test]
    fn from_file_reads_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "servers:\n  files:\n    command: files-server\n    args: [\"/tmp\"]\n    shutdown_grace_ms: 250\n"
        )
        .unwrap();

        let config = McpConfig::from_file(file.path()).unwrap();
        let files = &config.servers["files"];
        assert_eq!(files.command.as_deref(), Some("files-server"));
        assert_eq!(files.shutdown_grace_ms, 250);
    }

    #[test]
    fn from_file_reports_bad_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{ not json").unwrap();

        let error = McpConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(error, McpError::InvalidConfig(_)));
    }
}
