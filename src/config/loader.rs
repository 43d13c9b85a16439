use super::schema::{default_client_id, Config};
use crate::capture::MAX_BODY_CAPTURE_BYTES;
use crate::error::{ConfigError, Result};
use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use std::path::Path;
use tracing::warn;

/// Plain environment variables read without a prefix.
const ENV_KEYS: &[&str] = &[
    "PROXY_PORT",
    "MGMT_PORT",
    "MAX_EVENTS",
    "REQUIRE_TOKEN",
    "TOKEN",
    "DEFAULT_CLIENT_ID",
    "SAMPLE_RATE",
    "CAPTURE_HTTP_HEADERS",
    "CAPTURE_HTTP_BODY_BYTES",
    "CAPTURE_HTTP_BODY_TEXT",
];

/// Regex variables taken verbatim; figment would parse `[a-z]` into an array.
const RAW_ENV_KEYS: &[(&str, &str)] = &[
    ("ALLOW_HOST_REGEX", "allow_host_regex"),
    ("DENY_HOST_REGEX", "deny_host_regex"),
];

/// Loads configuration from defaults, an optional file and the environment.
pub fn load(path: Option<&Path>) -> Result<Config> {
    from_figment(figment(path))
}

/// Layering used by [`load`]: defaults, then the config file, then the plain
/// environment variables, then `PROXYGLASS_*` overrides.
pub fn figment(path: Option<&Path>) -> Figment {
    let base = Figment::from(Serialized::defaults(Config::default()));

    let with_file = match path {
        Some(path) => merge_file(base, path),
        None => base
            .merge(Toml::file("proxyglass.toml"))
            .merge(Json::file("proxyglass.json"))
            .merge(Yaml::file("proxyglass.yaml"))
            .merge(Yaml::file("proxyglass.yml")),
    };

    let ignored: Vec<&str> = RAW_ENV_KEYS.iter().map(|(var, _)| *var).collect();
    let with_env = with_file
        .merge(Env::raw().only(ENV_KEYS))
        .merge(Env::prefixed("PROXYGLASS_").ignore(&ignored));

    merge_raw_env(with_env, |var| std::env::var(var).ok())
}

/// Merges the regex variables as plain strings, `PROXYGLASS_*` last.
fn merge_raw_env(mut figment: Figment, lookup: impl Fn(&str) -> Option<String>) -> Figment {
    for prefix in ["", "PROXYGLASS_"] {
        for (var, key) in RAW_ENV_KEYS {
            if let Some(value) = lookup(&format!("{prefix}{var}")) {
                figment = figment.merge(Serialized::default(key, value));
            }
        }
    }
    figment
}

fn merge_file(figment: Figment, path: &Path) -> Figment {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => figment.merge(Json::file(path)),
        Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
        _ => figment.merge(Toml::file(path)),
    }
}

pub fn from_figment(figment: Figment) -> Result<Config> {
    let config: Config = figment
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    let config = normalize(config);
    validate(&config)?;
    Ok(config)
}

/// Clamps numeric settings into their supported ranges.
pub fn normalize(mut config: Config) -> Config {
    config.max_events = config.max_events.max(1);
    config.sample_rate = if config.sample_rate.is_nan() {
        1.0
    } else {
        config.sample_rate.clamp(0.0, 1.0)
    };
    config.capture_http_body_bytes = config.capture_http_body_bytes.min(MAX_BODY_CAPTURE_BYTES);
    if config.default_client_id.is_empty() {
        config.default_client_id = default_client_id();
    }
    config
}

pub fn validate(config: &Config) -> Result<()> {
    if config.proxy_port != 0
        && config.proxy_port == config.mgmt_port
        && config.proxy_host == config.mgmt_host
    {
        return Err(ConfigError::Validation(
            "Proxy and management listeners must use different ports".into(),
        )
        .into());
    }

    if config.require_token && config.token.is_none() {
        warn!("REQUIRE_TOKEN is set but TOKEN is empty; management endpoints will reject all requests");
    }

    Ok(())
}
