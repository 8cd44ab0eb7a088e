//! Configuration loading
//!
//! Settings come from a TOML file, then environment variables override
//! individual values:
//!
//! | Variable             | Field         |
//! |----------------------|---------------|
//! | `ODATA_MCP_CONFIG`   | config path   |
//! | `ODATA_SERVICE_URL`  | `service_url` |
//! | `ODATA_USERNAME`     | `username`    |
//! | `ODATA_PASSWORD`     | `password`    |
//! | `ODATA_COOKIES`      | `cookies` (`a=1; b=2`) |
//! | `ODATA_VERBOSE`      | `verbose`     |

use crate::odata::client::{ClientSettings, DEFAULT_TIMEOUT_SECS};
use crate::odata::request::DEFAULT_USER_AGENT;
use crate::odata::session::{ClientSession, Credentials};
use reqwest::Url;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "odata-mcp.toml";

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Missing service URL (set service_url or ODATA_SERVICE_URL)")]
    MissingServiceUrl,

    #[error("Invalid service URL '{0}': {1}")]
    InvalidServiceUrl(String, String),

    #[error("Username is set but password is missing")]
    MissingPassword,
}

/// Raw configuration as written by the user
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub service_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,

    /// Cookies sent with every request, in file order
    #[serde(default, deserialize_with = "ordered_pairs")]
    pub cookies: Vec<(String, String)>,

    #[serde(default)]
    pub verbose: bool,

    pub timeout_secs: Option<u64>,

    #[serde(default)]
    pub insecure_ssl: bool,

    pub user_agent: Option<String>,
}

/// Validated configuration
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub service_url: String,
    pub credentials: Credentials,
    pub verbose: bool,
    pub timeout: Duration,
    pub insecure_ssl: bool,
    pub user_agent: String,
}

impl Config {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_toml(&content)
    }

    /// Load from `ODATA_MCP_CONFIG` or `odata-mcp.toml`, then apply
    /// environment overrides
    pub fn load_default() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("ODATA_MCP_CONFIG") {
            Ok(path) => Self::load(Path::new(&path))?,
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if path.exists() {
                    Self::load(path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Override fields from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = lookup("ODATA_SERVICE_URL") {
            self.service_url = Some(url);
        }
        if let Some(user) = lookup("ODATA_USERNAME") {
            self.username = Some(user);
        }
        if let Some(pass) = lookup("ODATA_PASSWORD") {
            self.password = Some(pass);
        }
        if let Some(cookies) = lookup("ODATA_COOKIES") {
            self.cookies = parse_cookie_string(&cookies);
        }
        if let Some(verbose) = lookup("ODATA_VERBOSE") {
            self.verbose = matches!(verbose.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
    }

    /// Validate and convert into runtime configuration
    pub fn to_runtime(&self) -> Result<RuntimeConfig, ConfigError> {
        let service_url = self
            .service_url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or(ConfigError::MissingServiceUrl)?;

        let parsed = Url::parse(service_url)
            .map_err(|e| ConfigError::InvalidServiceUrl(service_url.to_string(), e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidServiceUrl(
                service_url.to_string(),
                format!("unsupported scheme {}", parsed.scheme()),
            ));
        }

        let username = self.username.clone().filter(|u| !u.is_empty());
        let password = self.password.clone().filter(|p| !p.is_empty());
        if username.is_some() && password.is_none() {
            return Err(ConfigError::MissingPassword);
        }

        Ok(RuntimeConfig {
            service_url: service_url.to_string(),
            credentials: Credentials {
                username,
                password,
                cookies: self.cookies.clone(),
            },
            verbose: self.verbose,
            timeout: Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            insecure_ssl: self.insecure_ssl,
            user_agent: self
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        })
    }
}

impl RuntimeConfig {
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            timeout: self.timeout,
            insecure_ssl: self.insecure_ssl,
            user_agent: self.user_agent.clone(),
            verbose: self.verbose,
        }
    }

    /// Fresh session for the configured service
    pub fn session(&self) -> ClientSession {
        ClientSession::new(self.service_url.clone(), self.credentials.clone())
    }
}

/// Parse `name=value; name2=value2`
pub fn parse_cookie_string(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                None
            } else {
                Some((name.to_string(), value.trim().to_string()))
            }
        })
        .collect()
}

fn ordered_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a table of cookie names to values")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut pairs = Vec::new();
            while let Some((name, value)) = map.next_entry::<String, String>()? {
                pairs.push((name, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parse_full() {
        let config = Config::from_toml(
            r#"
            service_url = "https://sap.example.com/sap/opu/odata/sap/ZSVC"
            username = "DEV"
            password = "secret"
            verbose = true
            timeout_secs = 60

            [cookies]
            MYSAPSSO2 = "token"
            sap-usercontext = "sap-client=100"
            "#,
        )
        .unwrap();

        assert!(config.verbose);
        assert_eq!(
            config.cookies,
            vec![
                ("MYSAPSSO2".to_string(), "token".to_string()),
                ("sap-usercontext".to_string(), "sap-client=100".to_string()),
            ]
        );

        let runtime = config.to_runtime().unwrap();
        assert_eq!(runtime.timeout, Duration::from_secs(60));
        assert_eq!(runtime.credentials.basic_auth(), Some(("DEV", "secret")));
        assert_eq!(runtime.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(
            runtime.session().base_url(),
            "https://sap.example.com/sap/opu/odata/sap/ZSVC/"
        );
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_toml(r#"service_url = "http://localhost:8080/odata""#).unwrap();
        let runtime = config.to_runtime().unwrap();
        assert_eq!(runtime.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert!(!runtime.verbose);
        assert!(!runtime.insecure_ssl);
        assert!(runtime.credentials.cookies.is_empty());
        assert!(runtime.client_settings().timeout.as_secs() > 0);
    }

    #[test]
    fn test_missing_url() {
        let err = Config::default().to_runtime().unwrap_err();
        assert!(matches!(err, ConfigError::MissingServiceUrl));
    }

    #[test]
    fn test_invalid_url() {
        let config = Config {
            service_url: Some("ftp://host/odata".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.to_runtime().unwrap_err(),
            ConfigError::InvalidServiceUrl(_, _)
        ));

        let config = Config {
            service_url: Some("not a url".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.to_runtime().unwrap_err(),
            ConfigError::InvalidServiceUrl(_, _)
        ));
    }

    #[test]
    fn test_username_requires_password() {
        let config = Config {
            service_url: Some("http://host/odata".to_string()),
            username: Some("user".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.to_runtime().unwrap_err(),
            ConfigError::MissingPassword
        ));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("ODATA_SERVICE_URL", "http://env-host/odata"),
            ("ODATA_USERNAME", "envuser"),
            ("ODATA_PASSWORD", "envpass"),
            ("ODATA_COOKIES", "a=1; b=x=y"),
            ("ODATA_VERBOSE", "TRUE"),
        ]
        .into_iter()
        .collect();

        let mut config = Config {
            service_url: Some("http://file-host/odata".to_string()),
            ..Default::default()
        };
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.service_url.as_deref(), Some("http://env-host/odata"));
        assert_eq!(config.username.as_deref(), Some("envuser"));
        assert!(config.verbose);
        assert_eq!(
            config.cookies,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x=y".to_string())
            ]
        );
    }

    #[test]
    fn test_empty_env_ignored() {
        let mut config = Config {
            service_url: Some("http://file-host/odata".to_string()),
            ..Default::default()
        };
        config.apply_env(|name| (name == "ODATA_SERVICE_URL").then(|| "  ".to_string()));
        assert_eq!(config.service_url.as_deref(), Some("http://file-host/odata"));
    }

    #[test]
    fn test_bad_toml() {
        assert!(matches!(
            Config::from_toml("service_url = ").unwrap_err(),
            ConfigError::Parse(_)
        ));
    }
}
