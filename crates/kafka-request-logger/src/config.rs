//! Configuration types and loading logic.

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use logger_tracing::TracingConfig;
use serde::Deserialize;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_address")]
    pub listen_address: String,
}

/// Upstream service the proxy forwards to.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,

    #[serde(default = "default_upstream_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

/// Request logger settings as written in the config file.
///
/// Values are kept raw here. Blank names fall back to defaults per phase call,
/// see [`crate::telemetry::settings`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggerConfig {
    #[serde(default)]
    pub header_name: String,

    #[serde(default)]
    pub topic: String,

    /// Comma-separated `host:port` list. Missing or blank disables publishing.
    #[serde(default)]
    pub brokers: String,

    #[serde(default)]
    pub routes: Vec<RouteOverride>,
}

/// Per-route overrides, matched by longest path prefix.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RouteOverride {
    pub path_prefix: String,
    pub header_name: Option<String>,
    pub topic: Option<String>,
    pub brokers: Option<String>,
}

/// Limits for the detached publish tasks.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    #[serde(default = "default_publish_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_message_timeout_ms")]
    pub message_timeout_ms: u64,
}

fn default_listen_address() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_upstream_timeout() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_in_flight() -> usize {
    256
}

fn default_publish_timeout() -> u64 {
    10
}

fn default_message_timeout_ms() -> u64 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: default_listen_address(),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            timeout_secs: default_publish_timeout(),
            message_timeout_ms: default_message_timeout_ms(),
        }
    }
}

impl LoggerConfig {
    /// Settings for a request path: the longest matching route prefix wins.
    ///
    /// An unknown path (the host could not report it) gets the process-level values.
    pub fn for_path(&self, path: Option<&str>) -> LoggerConfig {
        let route = path.and_then(|path| {
            self.routes
                .iter()
                .filter(|r| path.starts_with(&r.path_prefix))
                .max_by_key(|r| r.path_prefix.len())
        });

        let Some(route) = route else {
            return LoggerConfig {
                routes: Vec::new(),
                ..self.clone()
            };
        };

        LoggerConfig {
            header_name: route
                .header_name
                .clone()
                .unwrap_or_else(|| self.header_name.clone()),
            topic: route.topic.clone().unwrap_or_else(|| self.topic.clone()),
            brokers: route.brokers.clone().unwrap_or_else(|| self.brokers.clone()),
            routes: Vec::new(),
        }
    }
}

impl ProxyConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (KRL_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: ProxyConfig = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("KRL_").split("__"))
            .extract()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    fn route(prefix: &str, topic: Option<&str>) -> RouteOverride {
        RouteOverride {
            path_prefix: prefix.to_string(),
            header_name: None,
            topic: topic.map(str::to_string),
            brokers: None,
        }
    }

    #[test]
    fn test_load_from_toml_with_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [upstream]
                url = "http://127.0.0.1:9000"

                [logger]
                brokers = "kafka-1:9092,kafka-2:9092"
                "#,
            )?;

            let config = ProxyConfig::load("logger.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.server.listen_address, "0.0.0.0:8000");
            assert_eq!(config.upstream.url, "http://127.0.0.1:9000");
            assert_eq!(config.upstream.timeout_secs, 60);
            assert_eq!(config.logger.brokers, "kafka-1:9092,kafka-2:9092");
            assert_eq!(config.logger.header_name, "");
            assert_eq!(config.publisher.max_in_flight, 256);
            assert_eq!(config.tracing.log_level, "info");
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [upstream]
                url = "http://127.0.0.1:9000"

                [logger]
                topic = "from-file"
                "#,
            )?;
            jail.set_env("KRL_LOGGER__TOPIC", "from-env");
            jail.set_env("KRL_LOGGER__BROKERS", "localhost:9092");

            let config = ProxyConfig::load("logger.toml").map_err(|e| e.to_string())?;
            assert_eq!(config.logger.topic, "from-env");
            assert_eq!(config.logger.brokers, "localhost:9092");
            Ok(())
        });
    }

    #[test]
    fn test_missing_brokers_is_not_a_load_error() {
        Jail::expect_with(|jail| {
            jail.create_file("logger.toml", "[upstream]\nurl = \"http://up\"\n")?;
            let config = ProxyConfig::load("logger.toml").map_err(|e| e.to_string())?;
            assert!(config.logger.brokers.is_empty());
            Ok(())
        });
    }

    #[test]
    fn test_route_override_longest_prefix_wins() {
        let config = LoggerConfig {
            header_name: "trace-id".to_string(),
            topic: "default-topic".to_string(),
            brokers: "kafka:9092".to_string(),
            routes: vec![
                route("/api", Some("api-topic")),
                route("/api/orders", Some("orders-topic")),
            ],
        };

        assert_eq!(config.for_path(Some("/api/orders/7")).topic, "orders-topic");
        assert_eq!(config.for_path(Some("/api/users")).topic, "api-topic");
        assert_eq!(config.for_path(Some("/health")).topic, "default-topic");
        assert_eq!(config.for_path(None).topic, "default-topic");
        assert_eq!(config.for_path(Some("/api/users")).brokers, "kafka:9092");
    }

    #[test]
    fn test_route_override_from_toml() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "logger.toml",
                r#"
                [upstream]
                url = "http://up"

                [logger]
                brokers = "kafka:9092"

                [[logger.routes]]
                path_prefix = "/billing"
                topic = "billing-events"
                header_name = "x-billing-trace"
                "#,
            )?;
            let config = ProxyConfig::load("logger.toml").map_err(|e| e.to_string())?;
            let billing = config.logger.for_path(Some("/billing/invoices"));
            assert_eq!(billing.topic, "billing-events");
            assert_eq!(billing.header_name, "x-billing-trace");
            assert_eq!(billing.brokers, "kafka:9092");
            Ok(())
        });
    }
}
