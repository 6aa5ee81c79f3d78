//! Policy configuration: the `constellation.yaml` format, loading, and
//! structural validation.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Top-level policy file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub version: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultConfig>,

    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
}

/// Vault connection and authentication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    pub address: String,

    #[serde(default)]
    pub tls: TlsConfig,

    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,

    #[serde(default)]
    pub skip_verify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// `token` or `approle`.
    pub method: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id_path: Option<String>,
}

/// A single MCP server binding and its access policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    #[serde(default)]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets: Option<SecretsConfig>,

    /// Verdict when no rule matches: `allow` or `deny`.
    #[serde(default)]
    pub default: String,

    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// Env-var name → provider-qualified secret reference.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// One policy rule. Rules are ordered; the first match wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub tool: String,

    #[serde(default)]
    pub allow: bool,

    /// Argument-name → glob pattern. All clauses must match.
    #[serde(default)]
    pub when: BTreeMap<String, String>,
}

/// Structural validation failures, naming the offending server and rule.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required field: version")]
    MissingVersion,

    #[error("at least one server must be defined")]
    NoServers,

    #[error("server \"{server}\": missing required field: command")]
    MissingCommand { server: String },

    #[error("server \"{server}\": default must be \"deny\" or \"allow\", got \"{value}\"")]
    InvalidDefault { server: String, value: String },

    #[error("server \"{server}\": rule {index}: missing required field: tool")]
    MissingRuleTool { server: String, index: usize },
}

impl Config {
    /// Read, parse, and validate a policy file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading policy file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing policy file {}", path.display()))?;
        config.validate().context("invalid policy")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version.is_empty() {
            return Err(ConfigError::MissingVersion);
        }
        if self.servers.is_empty() {
            return Err(ConfigError::NoServers);
        }
        for (name, server) in &self.servers {
            if server.command.is_empty() {
                return Err(ConfigError::MissingCommand {
                    server: name.clone(),
                });
            }
            if server.default != "deny" && server.default != "allow" {
                return Err(ConfigError::InvalidDefault {
                    server: name.clone(),
                    value: server.default.clone(),
                });
            }
            for (index, rule) in server.rules.iter().enumerate() {
                if rule.tool.is_empty() {
                    return Err(ConfigError::MissingRuleTool {
                        server: name.clone(),
                        index,
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("parse failed")
    }

    #[test]
    fn parses_full_policy() {
        let config = parse(
            r#"
version: "1"
vault:
  address: https://vault.example.com:8200
  tls:
    ca_cert: /etc/ssl/vault-ca.pem
  auth:
    method: approle
    role_id_path: /etc/constellation/role_id
    secret_id_path: /etc/constellation/secret_id
servers:
  files:
    command: mcp-server-filesystem
    args: ["/data"]
    secrets:
      env:
        DB_URL: "vault:secret/data/myapp#connection_string"
    default: deny
    rules:
      - tool: read_file
        allow: true
        when:
          path: "/public/**"
"#,
        );

        config.validate().unwrap();
        let server = &config.servers["files"];
        assert_eq!(server.command, "mcp-server-filesystem");
        assert_eq!(server.args, vec!["/data"]);
        assert_eq!(server.rules.len(), 1);
        assert_eq!(server.rules[0].when["path"], "/public/**");
        assert_eq!(
            server.secrets.as_ref().unwrap().env["DB_URL"],
            "vault:secret/data/myapp#connection_string"
        );
        assert_eq!(
            config.vault.as_ref().unwrap().auth.method,
            "approle"
        );
    }

    #[test]
    fn rejects_missing_version() {
        let config = parse("servers:\n  a:\n    command: x\n    default: deny\n");
        assert!(matches!(config.validate(), Err(ConfigError::MissingVersion)));
    }

    #[test]
    fn rejects_empty_servers() {
        let config = parse("version: \"1\"\n");
        assert!(matches!(config.validate(), Err(ConfigError::NoServers)));
    }

    #[test]
    fn rejects_missing_command() {
        let config = parse("version: \"1\"\nservers:\n  a:\n    default: deny\n");
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "server \"a\": missing required field: command"
        );
    }

    #[test]
    fn rejects_bad_default() {
        let config = parse("version: \"1\"\nservers:\n  a:\n    command: x\n    default: maybe\n");
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "server \"a\": default must be \"deny\" or \"allow\", got \"maybe\""
        );
    }

    #[test]
    fn rejects_rule_without_tool() {
        let config = parse(
            "version: \"1\"\nservers:\n  a:\n    command: x\n    default: deny\n    rules:\n      - allow: true\n",
        );
        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "server \"a\": rule 0: missing required field: tool"
        );
    }
}
