use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_host", deserialize_with = "lenient::string")]
    pub proxy_host: String,
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    #[serde(default = "default_host", deserialize_with = "lenient::string")]
    pub mgmt_host: String,
    #[serde(default = "default_mgmt_port")]
    pub mgmt_port: u16,

    /// Ring capacity of the event store.
    #[serde(default = "default_max_events")]
    pub max_events: usize,

    #[serde(default)]
    pub log_format: LogFormat,
    /// Emit every committed event as a log line.
    #[serde(default = "default_true", deserialize_with = "lenient::flag")]
    pub log_events: bool,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub require_token: bool,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub token: Option<String>,

    #[serde(default = "default_client_id", deserialize_with = "lenient::string")]
    pub default_client_id: String,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,

    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub allow_host_regex: Option<String>,
    #[serde(default, deserialize_with = "lenient::opt_string")]
    pub deny_host_regex: Option<String>,

    #[serde(default, deserialize_with = "lenient::flag")]
    pub capture_http_headers: bool,
    /// Per-body capture cap; 0 disables body capture.
    #[serde(default)]
    pub capture_http_body_bytes: usize,
    #[serde(default = "default_true", deserialize_with = "lenient::flag")]
    pub capture_http_body_text: bool,

    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proxy_host: default_host(),
            proxy_port: default_proxy_port(),
            mgmt_host: default_host(),
            mgmt_port: default_mgmt_port(),
            max_events: default_max_events(),
            log_format: LogFormat::default(),
            log_events: true,
            require_token: false,
            token: None,
            default_client_id: default_client_id(),
            sample_rate: default_sample_rate(),
            allow_host_regex: None,
            deny_host_regex: None,
            capture_http_headers: false,
            capture_http_body_bytes: 0,
            capture_http_body_text: true,
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_proxy_port() -> u16 {
    3128
}

fn default_mgmt_port() -> u16 {
    9090
}

fn default_max_events() -> usize {
    5000
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_client_id() -> String {
    "unknown".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_shutdown_grace_secs() -> u64 {
    5
}

/// Deserializers that accept the loosely typed values environment variables
/// produce, e.g. `REQUIRE_TOKEN=yes` or a numeric `TOKEN`.
mod lenient {
    use serde::de::{self, Deserializer, Visitor};
    use std::fmt;

    const TRUTHY: &[&str] = &["1", "true", "yes", "y", "on"];

    pub fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        struct FlagVisitor;

        impl<'de> Visitor<'de> for FlagVisitor {
            type Value = bool;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a boolean flag")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
                Ok(v)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
                Ok(v == 1)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
                Ok(v == 1)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<bool, E> {
                Ok(v == 1.0)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<bool, E> {
                let v = v.trim().to_ascii_lowercase();
                Ok(TRUTHY.contains(&v.as_str()))
            }
        }

        d.deserialize_any(FlagVisitor)
    }

    struct TextVisitor;

    impl<'de> Visitor<'de> for TextVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a string")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<Self::Value, D::Error> {
            d.deserialize_any(TextVisitor)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok((!v.is_empty()).then(|| v.to_string()))
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }
    }

    pub fn opt_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        d.deserialize_any(TextVisitor)
    }

    /// Empty strings come back empty; the loader restores defaults.
    pub fn string<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(d.deserialize_any(TextVisitor)?.unwrap_or_default())
    }
}
