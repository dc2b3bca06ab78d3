pub mod api;
pub mod cli;
pub mod config;
pub mod provider_data;
pub mod resources;

use async_trait::async_trait;
use config::ProviderConfig;
use converge::diff::validate_config;
use converge::provider::unknown_resource;
use converge::types::Config;
use converge::{
    Context, ControlPlane, ConvergeError, Diagnostics, ManagedResource, Provider, Schema,
};
use provider_data::AwsProviderData;
use resources::appflow::connector_profile;
use resources::s3::directory_bucket;
use resources::{ConnectorProfileResource, DirectoryBucketResource};
use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

pub const PROVIDER_NAME: &str = "aws";

pub struct AwsProvider {
    data: Option<AwsProviderData>,
}

impl Default for AwsProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl AwsProvider {
    pub fn new() -> Self {
        Self { data: None }
    }

    fn data(&self) -> converge::Result<&AwsProviderData> {
        self.data
            .as_ref()
            .ok_or_else(|| ConvergeError::Custom("Provider not configured".to_string()))
    }
}

#[async_trait]
impl Provider for AwsProvider {
    fn type_name(&self) -> &str {
        PROVIDER_NAME
    }

    fn schema(&self) -> Schema {
        ProviderConfig::schema()
    }

    async fn configure(&mut self, _ctx: &Context, config: Config) -> Diagnostics {
        let mut diags = validate_config(&config, None, &ProviderConfig::schema());
        if diags.has_errors() {
            return diags;
        }

        let settings = match ProviderConfig::from_config(&config) {
            Ok(settings) => settings,
            Err(errors) => {
                diags.extend(errors);
                return diags;
            }
        };

        match api::Client::with_config(
            &settings.endpoint,
            &settings.api_token,
            settings.insecure,
            settings.retry.clone(),
        ) {
            Ok(client) => {
                tracing::info!(
                    endpoint = %settings.endpoint,
                    region = %settings.region,
                    "provider configured"
                );
                self.data = Some(AwsProviderData::new(
                    client,
                    settings.region,
                    settings.account_id,
                ));
            }
            Err(e) => {
                diags.add_error(format!("Failed to create API client: {}", e), None::<String>);
            }
        }

        diags
    }

    fn resource_types(&self) -> Vec<String> {
        self.resource_schemas().into_keys().collect()
    }

    fn resource(&self, type_name: &str) -> converge::Result<Arc<dyn ManagedResource>> {
        let data = self.data()?.clone();

        match type_name {
            directory_bucket::TYPE_NAME => Ok(Arc::new(DirectoryBucketResource::new(data))),
            connector_profile::TYPE_NAME => Ok(Arc::new(ConnectorProfileResource::new(data))),
            _ => Err(unknown_resource(PROVIDER_NAME, type_name)),
        }
    }

    fn client(&self) -> converge::Result<Arc<dyn ControlPlane>> {
        let client: Arc<dyn ControlPlane> = self.data()?.client.clone();
        Ok(client)
    }

    fn resource_schemas(&self) -> BTreeMap<String, Schema> {
        static SCHEMAS: OnceLock<BTreeMap<String, Schema>> = OnceLock::new();

        SCHEMAS
            .get_or_init(|| {
                let mut schemas = BTreeMap::new();
                schemas.insert(
                    directory_bucket::TYPE_NAME.to_string(),
                    DirectoryBucketResource::schema_static(),
                );
                schemas.insert(
                    connector_profile::TYPE_NAME.to_string(),
                    ConnectorProfileResource::schema_static(),
                );
                schemas
            })
            .clone()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use converge::{Dynamic, DynamicValue};
    use serial_test::serial;

    fn clear_env() {
        for var in [
            config::ENDPOINT_ENV,
            config::API_TOKEN_ENV,
            config::REGION_ENV,
            config::ACCOUNT_ID_ENV,
            config::INSECURE_ENV,
            config::TIMEOUT_ENV,
            config::MAX_RETRIES_ENV,
        ] {
            std::env::remove_var(var);
        }
    }

    #[tokio::test]
    #[serial]
    async fn provider_configures_successfully_with_env_vars() {
        clear_env();
        std::env::set_var(config::ENDPOINT_ENV, "https://localhost:8443");
        std::env::set_var(config::API_TOKEN_ENV, "secret");
        std::env::set_var(config::INSECURE_ENV, "true");

        let mut provider = AwsProvider::new();
        let diags = provider
            .configure(&Context::new(), DynamicValue::object())
            .await;

        assert!(diags.errors.is_empty(), "{}", diags);
        assert!(provider.data.is_some());

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_requires_endpoint() {
        clear_env();
        std::env::set_var(config::API_TOKEN_ENV, "secret");

        let mut provider = AwsProvider::new();
        let diags = provider
            .configure(&Context::new(), DynamicValue::object())
            .await;

        assert_eq!(diags.errors.len(), 1);
        assert!(diags.errors[0].summary.contains("endpoint is required"));
        assert!(provider.data.is_none());

        clear_env();
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_rejects_bad_account_id() {
        clear_env();

        let config = DynamicValue::new(
            [
                ("endpoint".to_string(), Dynamic::from("https://localhost:8443")),
                ("api_token".to_string(), Dynamic::from("secret")),
                ("account_id".to_string(), Dynamic::from("12345")),
            ]
            .into_iter()
            .collect(),
        );
        let mut provider = AwsProvider::new();
        let diags = provider.configure(&Context::new(), config).await;

        assert_eq!(diags.errors.len(), 1);
        assert!(diags.errors[0].summary.contains("account_id"));
        assert!(provider.data.is_none());
    }

    #[tokio::test]
    #[serial]
    async fn provider_configure_rejects_bad_endpoint() {
        clear_env();

        let config = DynamicValue::new(
            [
                ("endpoint".to_string(), Dynamic::from("ftp://localhost")),
                ("api_token".to_string(), Dynamic::from("secret")),
            ]
            .into_iter()
            .collect(),
        );
        let mut provider = AwsProvider::new();
        let diags = provider.configure(&Context::new(), config).await;

        assert_eq!(diags.errors.len(), 1);
        assert!(diags.errors[0]
            .summary
            .contains("Failed to create API client"));
    }

    #[tokio::test]
    #[serial]
    async fn provider_creates_resources_after_configuration() {
        clear_env();
        std::env::set_var(config::ENDPOINT_ENV, "https://localhost:8443");
        std::env::set_var(config::API_TOKEN_ENV, "secret");

        let mut provider = AwsProvider::new();
        provider
            .configure(&Context::new(), DynamicValue::object())
            .await;

        let bucket = provider.resource(directory_bucket::TYPE_NAME).unwrap();
        assert_eq!(bucket.kind(), directory_bucket::KIND);
        assert!(provider.executor(connector_profile::TYPE_NAME).is_ok());

        let unknown = provider.resource("aws_s3_bucket");
        assert!(unknown
            .err()
            .unwrap()
            .to_string()
            .contains("has no resource type aws_s3_bucket"));

        clear_env();
    }

    #[test]
    fn provider_fails_to_create_resources_before_configuration() {
        let provider = AwsProvider::new();

        let resource = provider.resource(directory_bucket::TYPE_NAME);
        assert!(resource
            .err()
            .unwrap()
            .to_string()
            .contains("Provider not configured"));
        assert!(provider.client().is_err());
    }

    #[test]
    fn provider_schemas_contain_expected_resources() {
        let provider = AwsProvider::new();

        let schemas = provider.resource_schemas();
        assert_eq!(
            provider.resource_types(),
            vec![
                connector_profile::TYPE_NAME.to_string(),
                directory_bucket::TYPE_NAME.to_string()
            ]
        );
        for schema in schemas.values() {
            schema.validate_definition().unwrap();
        }
    }
}
