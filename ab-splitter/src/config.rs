use serde::Deserialize;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("timeout_secs cannot be 0")]
    InvalidTimeout,

    #[error("assets_url must be a plain http URL: {0}")]
    InvalidAssetsUrl(String),
}

fn default_timeout_secs() -> u64 {
    10
}

/// A/B splitter configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    pub listener: Listener,
    pub admin_listener: Listener,
    /// Origin serving the static pages, e.g. `http://127.0.0.1:9000`. Only
    /// plain HTTP is supported; the origin is expected on the private network.
    pub assets_url: Url,
    /// Upper bound for a full request to the asset origin
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;

        if self.timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }

        if self.assets_url.scheme() != "http" || !self.assets_url.has_host() {
            return Err(ValidationError::InvalidAssetsUrl(
                self.assets_url.to_string(),
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(assets_url: &str) -> Config {
        let yaml = format!(
            r#"
            listener:
                host: 0.0.0.0
                port: 8090
            admin_listener:
                host: 127.0.0.1
                port: 8091
            assets_url: {assets_url}
            "#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    #[test]
    fn test_config() {
        let config = parse("http://127.0.0.1:9000");
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.assets_url.port(), Some(9000));
    }

    #[test]
    fn test_invalid_assets_url() {
        let config = parse("ftp://files.example.com");
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidAssetsUrl(
                "ftp://files.example.com/".into()
            ))
        );
    }

    #[test]
    fn test_invalid_port() {
        let mut config = parse("http://127.0.0.1:9000");
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));
    }
}
