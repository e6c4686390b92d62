use serde::{Deserialize, Serialize};

use crate::secret::SecretString;

/// Main configuration for the gate node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// HTTP server configuration
    pub server: ServerConfig,
    /// Domain and resource tree locations
    pub domain: DomainConfig,
    /// Authentication and token sealing settings
    pub auth: AuthConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address, e.g. `127.0.0.1:8888`
    pub listen_addr: String,
}

/// Locations of the domain files and the guarded resource tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Directory holding user.txt, role.txt, and password.txt
    pub domain_root: String,
    /// Root of the resource tree served and guarded by the gate
    pub resource_root: String,
    /// Per-directory rule file name
    pub rule_file_name: String,
}

/// Authentication settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Session cookie name
    pub cookie_name: String,
    /// Key material for the token sealing cipher
    pub cipher_key: SecretString,
    /// Lifetime of login cookies in seconds
    pub default_cookie_lifetime_seconds: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter when RUST_LOG is not set
    pub level: String,
    /// Output format: text or json
    pub format: Option<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                listen_addr: "127.0.0.1:8888".to_string(),
            },
            domain: DomainConfig {
                domain_root: "data/domain".to_string(),
                resource_root: "data/root".to_string(),
                rule_file_name: ".rbac.txt".to_string(),
            },
            auth: AuthConfig {
                cookie_name: "authsession".to_string(),
                cipher_key: SecretString::new("dev-cipher-key-not-for-production"),
                default_cookie_lifetime_seconds: 60,
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: Some("text".to_string()),
            },
        }
    }
}

impl GateConfig {
    /// Load configuration from file
    pub fn from_file(path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("GATE"))
            .build()?;

        let mut loaded: Self = settings.try_deserialize()?;
        // The key may be supplied out-of-band instead of in the file.
        if let Some(key) = SecretString::from_env("GATE_CIPHER_KEY") {
            loaded.auth.cipher_key = key;
        }
        Ok(loaded)
    }

    /// Save configuration to file
    #[allow(dead_code)]
    pub fn save_to_file(&self, path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.server.listen_addr.is_empty() {
            return Err("Listen address cannot be empty".to_string());
        }

        if self.domain.domain_root.is_empty() {
            return Err("Domain root cannot be empty".to_string());
        }

        if self.domain.resource_root.is_empty() {
            return Err("Resource root cannot be empty".to_string());
        }

        if self.domain.rule_file_name.is_empty() || self.domain.rule_file_name.contains('/') {
            return Err("Rule file name must be a bare file name".to_string());
        }

        if self.auth.cookie_name.is_empty()
            || self
                .auth
                .cookie_name
                .chars()
                .any(|c| c.is_whitespace() || c == ';' || c == '=')
        {
            return Err("Cookie name must be a token without separators".to_string());
        }

        if self.auth.cipher_key.is_empty() {
            return Err("Cipher key cannot be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(GateConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_cookie_name() {
        let mut config = GateConfig::default();
        config.auth.cookie_name = "auth session".to_string();
        assert!(config.validate().is_err());
        config.auth.cookie_name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_pathlike_rule_file_name() {
        let mut config = GateConfig::default();
        config.domain.rule_file_name = "rules/.rbac.txt".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_cipher_key() {
        let mut config = GateConfig::default();
        config.auth.cipher_key = SecretString::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("gate.toml"),
            r#"
[server]
listen_addr = "127.0.0.1:9000"

[domain]
domain_root = "/srv/domain"
resource_root = "/srv/root"
rule_file_name = ".rbac.txt"

[auth]
cookie_name = "session"
cipher_key = "file-key"
default_cookie_lifetime_seconds = 120

[logging]
level = "info"
"#,
        )
        .unwrap();
        // config::File::with_name expects the stem, not the extension
        let stem = dir.path().join("gate");
        let config = GateConfig::from_file(stem.to_str().unwrap()).unwrap();
        assert_eq!(config.server.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.auth.cookie_name, "session");
        assert_eq!(config.auth.cipher_key.expose(), "file-key");
        assert_eq!(config.auth.default_cookie_lifetime_seconds, 120);
        assert!(config.validate().is_ok());
    }
}
