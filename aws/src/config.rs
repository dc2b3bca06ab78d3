//! Provider configuration
//!
//! Every setting can come from the provider configuration block or from an
//! `AWS_CONVERGE_*` environment variable; the block wins.

use crate::api::RetryConfig;
use converge::schema::{AttributeBuilder, AttributeType, Schema, SchemaBuilder};
use converge::types::Config;
use converge::validator::{NumberRangeValidator, StringPatternValidator};
use converge::{AttributePath, Diagnostics, Dynamic};
use std::fmt;

pub const ENDPOINT_ENV: &str = "AWS_CONVERGE_ENDPOINT";
pub const API_TOKEN_ENV: &str = "AWS_CONVERGE_API_TOKEN";
pub const REGION_ENV: &str = "AWS_CONVERGE_REGION";
pub const ACCOUNT_ID_ENV: &str = "AWS_CONVERGE_ACCOUNT_ID";
pub const INSECURE_ENV: &str = "AWS_CONVERGE_INSECURE";
pub const TIMEOUT_ENV: &str = "AWS_CONVERGE_TIMEOUT_SECONDS";
pub const MAX_RETRIES_ENV: &str = "AWS_CONVERGE_MAX_RETRIES";

pub const DEFAULT_REGION: &str = "us-east-1";

#[derive(Clone)]
pub struct ProviderConfig {
    pub endpoint: String,
    pub api_token: String,
    pub region: String,
    pub account_id: String,
    pub insecure: bool,
    pub retry: RetryConfig,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("api_token", &"(sensitive value)")
            .field("region", &self.region)
            .field("account_id", &self.account_id)
            .field("insecure", &self.insecure)
            .field("retry", &self.retry)
            .finish()
    }
}

impl ProviderConfig {
    pub fn schema() -> Schema {
        SchemaBuilder::new()
            .description("Connection settings for the control plane")
            .attribute(
                AttributeBuilder::new("endpoint", AttributeType::String)
                    .description("Control plane base URL. Falls back to AWS_CONVERGE_ENDPOINT.")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("api_token", AttributeType::String)
                    .description("Bearer token. Falls back to AWS_CONVERGE_API_TOKEN.")
                    .optional()
                    .sensitive()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("region", AttributeType::String)
                    .description("Region used in ARNs. Defaults to us-east-1.")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("account_id", AttributeType::String)
                    .description("Account used in ARNs.")
                    .optional()
                    .validator(StringPatternValidator::new(
                        r"^\d{12}$",
                        "must be a 12 digit account ID",
                    ))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("insecure", AttributeType::Bool)
                    .description("Skip TLS certificate verification")
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("timeout_seconds", AttributeType::Int)
                    .description("Per-request timeout")
                    .optional()
                    .validator(NumberRangeValidator::between(1.0, 3600.0))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("max_retries", AttributeType::Int)
                    .description("Retries for throttled or failed requests")
                    .optional()
                    .validator(NumberRangeValidator::between(0.0, 25.0))
                    .build(),
            )
            .build()
    }

    /// Resolves settings from the block and the environment
    pub fn from_config(config: &Config) -> Result<Self, Diagnostics> {
        let mut diags = Diagnostics::new();

        let endpoint = string_setting(config, "endpoint", ENDPOINT_ENV);
        let api_token = string_setting(config, "api_token", API_TOKEN_ENV);
        let region = string_setting(config, "region", REGION_ENV)
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        let account_id = string_setting(config, "account_id", ACCOUNT_ID_ENV).unwrap_or_default();
        let insecure = bool_setting(config, "insecure", INSECURE_ENV, &mut diags).unwrap_or(false);

        let mut retry = RetryConfig::default();
        if let Some(timeout) = int_setting(config, "timeout_seconds", TIMEOUT_ENV, &mut diags) {
            retry.timeout_seconds = positive(timeout, "timeout_seconds", &mut diags);
        }
        if let Some(max_retries) = int_setting(config, "max_retries", MAX_RETRIES_ENV, &mut diags) {
            retry.max_retries = positive(max_retries, "max_retries", &mut diags) as u32;
        }

        if endpoint.is_none() {
            diags.add_error(
                "endpoint is required (set in provider config or AWS_CONVERGE_ENDPOINT env var)",
                None::<String>,
            );
        }
        if api_token.is_none() {
            diags.add_error(
                "api_token is required (set in provider config or AWS_CONVERGE_API_TOKEN env var)",
                None::<String>,
            );
        }

        match (endpoint, api_token) {
            (Some(endpoint), Some(api_token)) if !diags.has_errors() => Ok(Self {
                endpoint,
                api_token,
                region,
                account_id,
                insecure,
                retry,
            }),
            _ => Err(diags),
        }
    }
}

fn configured(config: &Config, name: &str) -> Option<Dynamic> {
    config
        .get(&AttributePath::new(name))
        .filter(|v| !v.is_null())
        .cloned()
}

fn env_value(env_var: &str) -> Option<String> {
    std::env::var(env_var).ok().filter(|v| !v.is_empty())
}

fn string_setting(config: &Config, name: &str, env_var: &str) -> Option<String> {
    configured(config, name)
        .and_then(|v| v.as_string().map(str::to_string))
        .or_else(|| env_value(env_var))
}

fn bool_setting(config: &Config, name: &str, env_var: &str, diags: &mut Diagnostics) -> Option<bool> {
    if let Some(value) = configured(config, name).and_then(|v| v.as_bool()) {
        return Some(value);
    }
    let raw = env_value(env_var)?;
    match raw.parse::<bool>() {
        Ok(value) => Some(value),
        Err(_) => {
            diags.add_error(
                format!("{} must be true or false, got {:?}", env_var, raw),
                None::<String>,
            );
            None
        }
    }
}

fn int_setting(config: &Config, name: &str, env_var: &str, diags: &mut Diagnostics) -> Option<i64> {
    if let Some(value) = configured(config, name).and_then(|v| v.as_int()) {
        return Some(value);
    }
    let raw = env_value(env_var)?;
    match raw.parse::<i64>() {
        Ok(value) => Some(value),
        Err(_) => {
            diags.add_error(
                format!("{} must be a whole number, got {:?}", env_var, raw),
                None::<String>,
            );
            None
        }
    }
}

fn positive(value: i64, name: &str, diags: &mut Diagnostics) -> u64 {
    u64::try_from(value).unwrap_or_else(|_| {
        diags.add_error(format!("{} must not be negative", name), None::<String>);
        0
    })
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use converge::DynamicValue;
    use serial_test::serial;

    const ALL_ENV: [&str; 7] = [
        ENDPOINT_ENV,
        API_TOKEN_ENV,
        REGION_ENV,
        ACCOUNT_ID_ENV,
        INSECURE_ENV,
        TIMEOUT_ENV,
        MAX_RETRIES_ENV,
    ];

    fn clear_env() {
        for var in ALL_ENV {
            std::env::remove_var(var);
        }
    }

    fn block(pairs: &[(&str, Dynamic)]) -> Config {
        DynamicValue::new(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    #[test]
    #[serial]
    fn config_block_takes_precedence_over_env() {
        clear_env();
        std::env::set_var(ENDPOINT_ENV, "https://env.example.com");
        std::env::set_var(API_TOKEN_ENV, "env-token");
        std::env::set_var(REGION_ENV, "eu-west-1");

        let config = ProviderConfig::from_config(&block(&[
            ("endpoint", "https://block.example.com".into()),
            ("max_retries", Dynamic::Int(7)),
        ]))
        .unwrap();

        assert_eq!(config.endpoint, "https://block.example.com");
        assert_eq!(config.api_token, "env-token");
        assert_eq!(config.region, "eu-west-1");
        assert_eq!(config.retry.max_retries, 7);
        assert!(!config.insecure);

        clear_env();
    }

    #[test]
    #[serial]
    fn missing_endpoint_and_token_are_both_reported() {
        clear_env();

        let diags = ProviderConfig::from_config(&DynamicValue::object()).unwrap_err();
        assert_eq!(diags.errors.len(), 2);
        assert!(diags.errors[0].summary.contains("endpoint is required"));
        assert!(diags.errors[1].summary.contains("api_token is required"));
    }

    #[test]
    #[serial]
    fn malformed_env_values_are_errors() {
        clear_env();
        std::env::set_var(ENDPOINT_ENV, "https://env.example.com");
        std::env::set_var(API_TOKEN_ENV, "env-token");
        std::env::set_var(INSECURE_ENV, "sometimes");
        std::env::set_var(TIMEOUT_ENV, "ten");

        let diags = ProviderConfig::from_config(&DynamicValue::object()).unwrap_err();
        assert_eq!(diags.errors.len(), 2);

        clear_env();
    }

    #[test]
    #[serial]
    fn defaults_apply_when_nothing_else_is_set() {
        clear_env();
        std::env::set_var(ENDPOINT_ENV, "https://env.example.com");
        std::env::set_var(API_TOKEN_ENV, "env-token");

        let config = ProviderConfig::from_config(&DynamicValue::object()).unwrap();
        assert_eq!(config.region, DEFAULT_REGION);
        assert_eq!(config.account_id, "");
        assert_eq!(config.retry.max_retries, RetryConfig::default().max_retries);
        assert!(!format!("{:?}", config).contains("env-token"));

        clear_env();
    }

    #[test]
    fn schema_definition_is_valid() {
        ProviderConfig::schema().validate_definition().unwrap();
    }
}
