//! Effective per-phase settings: defaults for blank names, broker list parsing.

use thiserror::Error;

use crate::config::LoggerConfig;

pub const DEFAULT_TOPIC_NAME: &str = "kong-kafka-request-logger-plugin";
pub const DEFAULT_TRACE_HEADER_NAME: &str = "trace-id";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no kafka brokers configured")]
    NoBrokers,
}

/// Settings one phase call runs with. Computed fresh per call, never shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveSettings {
    pub header_name: String,
    pub topic: String,
    pub brokers: Vec<String>,
}

/// Trimmed `value`, or `default` when that leaves nothing.
pub fn apply_default(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Split a comma-separated `host:port` list, keeping order and dropping blanks.
pub fn parse_brokers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
        .collect()
}

impl EffectiveSettings {
    pub fn resolve(config: &LoggerConfig) -> Result<Self, ConfigError> {
        let brokers = parse_brokers(&config.brokers);
        if brokers.is_empty() {
            return Err(ConfigError::NoBrokers);
        }

        Ok(Self {
            header_name: apply_default(&config.header_name, DEFAULT_TRACE_HEADER_NAME),
            topic: apply_default(&config.topic, DEFAULT_TOPIC_NAME),
            brokers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logger(header_name: &str, topic: &str, brokers: &str) -> LoggerConfig {
        LoggerConfig {
            header_name: header_name.to_string(),
            topic: topic.to_string(),
            brokers: brokers.to_string(),
            routes: Vec::new(),
        }
    }

    #[test]
    fn test_blank_names_fall_back_to_defaults() {
        let settings = EffectiveSettings::resolve(&logger("", "", "kafka:9092")).unwrap();
        assert_eq!(settings.header_name, "trace-id");
        assert_eq!(settings.topic, "kong-kafka-request-logger-plugin");

        let settings = EffectiveSettings::resolve(&logger("   ", "\t", "kafka:9092")).unwrap();
        assert_eq!(settings.header_name, "trace-id");
        assert_eq!(settings.topic, "kong-kafka-request-logger-plugin");
    }

    #[test]
    fn test_names_are_trimmed() {
        let settings =
            EffectiveSettings::resolve(&logger("  x-trace  ", " orders ", "kafka:9092")).unwrap();
        assert_eq!(settings.header_name, "x-trace");
        assert_eq!(settings.topic, "orders");
    }

    #[test]
    fn test_brokers_required() {
        assert_eq!(
            EffectiveSettings::resolve(&logger("", "", "")),
            Err(ConfigError::NoBrokers)
        );
        assert_eq!(
            EffectiveSettings::resolve(&logger("", "", " , ")),
            Err(ConfigError::NoBrokers)
        );
    }

    #[test]
    fn test_broker_order_preserved() {
        assert_eq!(
            parse_brokers("b1:9092, b2:9092 ,,b3:9093"),
            vec!["b1:9092", "b2:9092", "b3:9093"]
        );
    }
}
