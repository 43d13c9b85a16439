use super::schema::Config;
use crate::error::{ConfigError, PolicyReason};
use regex::Regex;

/// Destination host rules. The deny rule is checked before the allow rule.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    allow: Option<Regex>,
    deny: Option<Regex>,
}

impl HostPolicy {
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Ok(Self {
            allow: compile("ALLOW_HOST_REGEX", config.allow_host_regex.as_deref())?,
            deny: compile("DENY_HOST_REGEX", config.deny_host_regex.as_deref())?,
        })
    }

    pub fn check(&self, host: &str) -> Result<(), PolicyReason> {
        if self.deny.as_ref().is_some_and(|re| re.is_match(host)) {
            return Err(PolicyReason::DenyHostRegex);
        }
        if self.allow.as_ref().is_some_and(|re| !re.is_match(host)) {
            return Err(PolicyReason::AllowHostRegex);
        }
        Ok(())
    }
}

fn compile(field: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, ConfigError> {
    pattern
        .map(|p| Regex::new(p).map_err(|source| ConfigError::Regex { field, source }))
        .transpose()
}
