use crate::config::{Config, HostPolicy};
use crate::error::Result;
use tracing::{info, warn};

/// Validates a loaded configuration and reports the effective settings.
pub fn run_config_check(config: &Config) -> Result<()> {
    info!("Checking configuration...");

    crate::config::loader::validate(config)?;
    HostPolicy::from_config(config)?;
    info!("✓ Configuration is valid");

    info!("  Proxy listener: {}:{}", config.proxy_host, config.proxy_port);
    info!("  Management listener: {}:{}", config.mgmt_host, config.mgmt_port);
    info!("  Event store capacity: {}", config.max_events);
    info!("  Sample rate: {}", config.sample_rate);

    if let Some(allow) = &config.allow_host_regex {
        info!("  Allow hosts: {}", allow);
    }
    if let Some(deny) = &config.deny_host_regex {
        info!("  Deny hosts: {}", deny);
    }

    if config.capture_http_headers {
        info!("  Capturing HTTP headers (sensitive values redacted)");
    }
    if config.capture_http_body_bytes > 0 {
        info!(
            "  Capturing up to {} body bytes (text preview: {})",
            config.capture_http_body_bytes, config.capture_http_body_text
        );
    }

    if config.require_token {
        match config.token {
            Some(_) => info!("  Management API requires a bearer token"),
            None => warn!("  ! Token required but none configured; protected endpoints reject everything"),
        }
    } else {
        warn!("  ! Management API is unauthenticated");
    }

    info!("✓ All checks passed");
    Ok(())
}
