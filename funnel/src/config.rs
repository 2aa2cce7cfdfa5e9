use ab_splitter::config::Config as AbSplitterConfig;
use serde::Deserialize;
use std::fs::File;
use submission_gateway::config::Config as SubmissionGatewayConfig;

#[derive(Deserialize, Debug, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug, PartialEq)]
pub struct LoggingConfig {
    pub sentry_dsn: String,
}

#[derive(Deserialize, Debug, Default, PartialEq)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub submission_gateway: Option<SubmissionGatewayConfig>,
    pub ab_splitter: Option<AbSplitterConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use dedup_cache::config::DurableStoreConfig;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn submission_gateway_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            submission_gateway:
                listener:
                    host: 0.0.0.0
                    port: 8080
                admin_listener:
                    host: 127.0.0.1
                    port: 8081
                airtable:
                    base_id: appBase
                    table_id: tblLeads
                    api_token: patSecret
                dedup:
                    durable_store:
                        type: cloudflare_kv
                        account_id: acc
                        namespace_id: ns
                        api_token: kvSecret
                    durable_timeout_ms: 750
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.common.metrics,
            Some(MetricsConfig {
                statsd_host: "127.0.0.1".into(),
                statsd_port: 8125,
            })
        );
        assert!(config.common.logging.is_none());
        assert!(config.ab_splitter.is_none());

        let gateway_config = config.submission_gateway.expect("submission gateway config");
        assert!(gateway_config.validate().is_ok());
        assert!(gateway_config.airtable.credentials().is_some());
        assert_eq!(gateway_config.dedup.durable_timeout_ms, 750);
        assert!(matches!(
            gateway_config.dedup.durable_store,
            Some(DurableStoreConfig::CloudflareKv { .. })
        ));
    }

    #[test]
    fn ab_splitter_config() {
        let yaml = r#"
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            ab_splitter:
                listener:
                    host: 0.0.0.0
                    port: 8090
                admin_listener:
                    host: 127.0.0.1
                    port: 8091
                assets_url: http://127.0.0.1:9000
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(
            config.common.logging,
            Some(LoggingConfig {
                sentry_dsn: "https://key@sentry.example.com/1".into()
            })
        );
        let splitter_config = config.ab_splitter.expect("ab splitter config");
        assert!(splitter_config.validate().is_ok());
        assert_eq!(splitter_config.assets_url.as_str(), "http://127.0.0.1:9000/");
    }

    #[test]
    fn missing_file() {
        let result = Config::from_file(std::path::Path::new("/nonexistent/funnel.yaml"));
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn invalid_yaml() {
        let tmp = write_tmp_file("submission_gateway: [not, a, mapping]");
        let result = Config::from_file(tmp.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }
}
