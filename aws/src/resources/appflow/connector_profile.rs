//! AppFlow connector profile resource
//!
//! A profile pairs a connector kind with its connection properties and
//! credentials. Only one connector block may be configured per section and it
//! must agree with `connector_type`. Credentials are write-only: the service
//! never returns them, so state keeps whatever was last applied.

use crate::provider_data::AwsProviderData;
use crate::resources::{block_payload, conform, decode, opt_string, path, required_string, string_at};
use converge::plan_modifier::UseStateForUnknown;
use converge::schema::{
    AttributeBuilder, AttributeType, Block, BlockBuilder, NestedBlock, Schema, SchemaBuilder,
};
use converge::types::Diagnostic;
use converge::validator::{OneOfValidator, StringLengthValidator, StringPatternValidator};
use converge::{
    AttributePath, ChangeSet, ConvergeError, Diagnostics, Dynamic, DynamicValue, ManagedResource,
    UpdateRequest,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const TYPE_NAME: &str = "aws_appflow_connector_profile";
pub const KIND: &str = "connector-profiles";

const CONFIG: &str = "connector_profile_config";
const CREDENTIALS: &str = "connector_profile_credentials";
const PROPERTIES: &str = "connector_profile_properties";

const ARN_PATTERN: &str = r"^arn:[\w-]+:[\w-]+:[\w-]*:\d{0,12}:.+$";
const NO_WHITESPACE: &str = r"^\S+$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorKind {
    Datadog,
    Dynatrace,
    Redshift,
    Salesforce,
    Snowflake,
}

impl ConnectorKind {
    pub const ALL: [ConnectorKind; 5] = [
        ConnectorKind::Datadog,
        ConnectorKind::Dynatrace,
        ConnectorKind::Redshift,
        ConnectorKind::Salesforce,
        ConnectorKind::Snowflake,
    ];

    /// Block name under the credentials and properties sections
    pub fn block_name(self) -> &'static str {
        match self {
            ConnectorKind::Datadog => "datadog",
            ConnectorKind::Dynatrace => "dynatrace",
            ConnectorKind::Redshift => "redshift",
            ConnectorKind::Salesforce => "salesforce",
            ConnectorKind::Snowflake => "snowflake",
        }
    }

    /// Value of `connector_type`, also the payload tag on the wire
    pub fn connector_type(self) -> &'static str {
        match self {
            ConnectorKind::Datadog => "Datadog",
            ConnectorKind::Dynatrace => "Dynatrace",
            ConnectorKind::Redshift => "Redshift",
            ConnectorKind::Salesforce => "Salesforce",
            ConnectorKind::Snowflake => "Snowflake",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatadogCredentials {
    pub api_key: String,
    pub application_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynatraceCredentials {
    pub api_token: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicAuthCredentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OAuthRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesforceCredentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_credentials_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwt_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2_grant_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_request: Option<OAuthRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

/// Secrets for one connector kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectorCredentials {
    Datadog(DatadogCredentials),
    Dynatrace(DynatraceCredentials),
    Redshift(BasicAuthCredentials),
    Salesforce(SalesforceCredentials),
    Snowflake(BasicAuthCredentials),
}

impl ConnectorCredentials {
    pub fn kind(&self) -> ConnectorKind {
        match self {
            ConnectorCredentials::Datadog(_) => ConnectorKind::Datadog,
            ConnectorCredentials::Dynatrace(_) => ConnectorKind::Dynatrace,
            ConnectorCredentials::Redshift(_) => ConnectorKind::Redshift,
            ConnectorCredentials::Salesforce(_) => ConnectorKind::Salesforce,
            ConnectorCredentials::Snowflake(_) => ConnectorKind::Snowflake,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceUrlProperties {
    pub instance_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedshiftProperties {
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_api_role_arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
    pub role_arn: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesforceProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_sandbox_environment: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_privatelink_for_metadata_and_authorization: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnowflakeProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_name: Option<String>,
    pub bucket_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_link_service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub stage: String,
    pub warehouse: String,
}

/// Connection properties for one connector kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConnectorProperties {
    Datadog(InstanceUrlProperties),
    Dynatrace(InstanceUrlProperties),
    Redshift(RedshiftProperties),
    Salesforce(SalesforceProperties),
    Snowflake(SnowflakeProperties),
}

impl ConnectorProperties {
    pub fn kind(&self) -> ConnectorKind {
        match self {
            ConnectorProperties::Datadog(_) => ConnectorKind::Datadog,
            ConnectorProperties::Dynatrace(_) => ConnectorKind::Dynatrace,
            ConnectorProperties::Redshift(_) => ConnectorKind::Redshift,
            ConnectorProperties::Salesforce(_) => ConnectorKind::Salesforce,
            ConnectorProperties::Snowflake(_) => ConnectorKind::Snowflake,
        }
    }
}

#[derive(Debug, Serialize)]
struct ConnectorProfileConfig {
    connector_profile_credentials: ConnectorCredentials,
    connector_profile_properties: ConnectorProperties,
}

#[derive(Debug, Serialize)]
struct CreateConnectorProfileRequest {
    name: String,
    connector_type: String,
    connection_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    connector_label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kms_arn: Option<String>,
    connector_profile_config: ConnectorProfileConfig,
}

#[derive(Debug, Serialize)]
struct UpdateConnectorProfileRequest {
    connection_mode: String,
    connector_profile_config: ConnectorProfileConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConnectorProfileDescription {
    arn: Option<String>,
    connection_mode: Option<String>,
    connector_label: Option<String>,
    connector_type: Option<String>,
    credentials_arn: Option<String>,
    kms_arn: Option<String>,
    connector_profile_properties: Option<ConnectorProperties>,
}

fn string_attr(name: &str, description: &str) -> AttributeBuilder {
    AttributeBuilder::new(name, AttributeType::String).description(description)
}

fn bool_attr(name: &str, description: &str) -> AttributeBuilder {
    AttributeBuilder::new(name, AttributeType::Bool)
        .description(description)
        .optional()
}

fn secret(name: &str, description: &str, max_len: usize) -> AttributeBuilder {
    string_attr(name, description)
        .sensitive()
        .validator(StringLengthValidator::between(1, max_len))
        .validator(StringPatternValidator::new(
            NO_WHITESPACE,
            "must not contain any whitespace characters",
        ))
}

fn arn_attr(name: &str, description: &str) -> AttributeBuilder {
    string_attr(name, description).validator(StringPatternValidator::new(
        ARN_PATTERN,
        "must be a valid ARN",
    ))
}

fn instance_url() -> Block {
    BlockBuilder::new()
        .attribute(
            string_attr("instance_url", "Location of the connector instance")
                .required()
                .validator(StringLengthValidator::between(1, 256))
                .validator(StringPatternValidator::new(
                    NO_WHITESPACE,
                    "must not contain any whitespace characters",
                ))
                .build(),
        )
        .build()
}

fn basic_auth() -> Block {
    BlockBuilder::new()
        .attribute(
            string_attr("username", "User name")
                .required()
                .validator(StringLengthValidator::between(1, 512))
                .build(),
        )
        .attribute(secret("password", "Password", 512).required().build())
        .build()
}

fn credentials_block(kind: ConnectorKind) -> Block {
    match kind {
        ConnectorKind::Datadog => BlockBuilder::new()
            .attribute(secret("api_key", "API key", 256).required().build())
            .attribute(
                string_attr("application_key", "Application key")
                    .required()
                    .validator(StringLengthValidator::between(1, 512))
                    .build(),
            )
            .build(),
        ConnectorKind::Dynatrace => BlockBuilder::new()
            .attribute(secret("api_token", "API token", 256).required().build())
            .build(),
        ConnectorKind::Redshift | ConnectorKind::Snowflake => basic_auth(),
        ConnectorKind::Salesforce => {
            let oauth_request = BlockBuilder::new()
                .attribute(
                    string_attr("auth_code", "Authorization code")
                        .optional()
                        .validator(StringLengthValidator::between(1, 2048))
                        .build(),
                )
                .attribute(
                    string_attr("redirect_uri", "Redirect URI of the OAuth flow")
                        .optional()
                        .validator(StringLengthValidator::between(1, 512))
                        .build(),
                )
                .build();

            BlockBuilder::new()
                .attribute(secret("access_token", "Access token", 2048).optional().build())
                .attribute(
                    arn_attr("client_credentials_arn", "Secret holding the client credentials")
                        .optional()
                        .build(),
                )
                .attribute(
                    string_attr("jwt_token", "JSON web token")
                        .optional()
                        .sensitive()
                        .validator(StringLengthValidator::between(1, 8000))
                        .build(),
                )
                .attribute(
                    string_attr("oauth2_grant_type", "OAuth 2.0 grant type")
                        .optional()
                        .validator(OneOfValidator::new(&[
                            "CLIENT_CREDENTIALS",
                            "AUTHORIZATION_CODE",
                            "JWT_BEARER",
                        ]))
                        .build(),
                )
                .attribute(secret("refresh_token", "Refresh token", 1024).optional().build())
                .block(NestedBlock::list("oauth_request", oauth_request).max_items(1))
                .build()
        }
    }
}

fn properties_block(kind: ConnectorKind) -> Block {
    match kind {
        ConnectorKind::Datadog | ConnectorKind::Dynatrace => instance_url(),
        ConnectorKind::Redshift => BlockBuilder::new()
            .attribute(
                string_attr("bucket_name", "Staging bucket")
                    .required()
                    .validator(StringLengthValidator::between(3, 63))
                    .build(),
            )
            .attribute(string_attr("bucket_prefix", "Staging key prefix").optional().build())
            .attribute(
                string_attr("cluster_identifier", "Redshift cluster")
                    .optional()
                    .build(),
            )
            .attribute(
                arn_attr("data_api_role_arn", "Role used by the Data API")
                    .optional()
                    .build(),
            )
            .attribute(string_attr("database_name", "Database").optional().build())
            .attribute(
                string_attr("database_url", "JDBC URL of the database")
                    .optional()
                    .validator(StringLengthValidator::between(1, 512))
                    .build(),
            )
            .attribute(
                arn_attr("role_arn", "Role granting access to the staging bucket")
                    .required()
                    .build(),
            )
            .build(),
        ConnectorKind::Salesforce => BlockBuilder::new()
            .attribute(string_attr("instance_url", "Salesforce instance").optional().build())
            .attribute(bool_attr("is_sandbox_environment", "Sandbox instance").build())
            .attribute(
                bool_attr(
                    "use_privatelink_for_metadata_and_authorization",
                    "Use PrivateLink for metadata and authorization calls",
                )
                .build(),
            )
            .build(),
        ConnectorKind::Snowflake => BlockBuilder::new()
            .attribute(string_attr("account_name", "Snowflake account").optional().build())
            .attribute(
                string_attr("bucket_name", "Staging bucket")
                    .required()
                    .validator(StringLengthValidator::between(3, 63))
                    .build(),
            )
            .attribute(string_attr("bucket_prefix", "Staging key prefix").optional().build())
            .attribute(
                string_attr("private_link_service_name", "PrivateLink service")
                    .optional()
                    .build(),
            )
            .attribute(string_attr("region", "Snowflake region").optional().build())
            .attribute(
                string_attr("stage", "External stage, e.g. my_db.my_schema.my_stage")
                    .required()
                    .validator(StringLengthValidator::between(1, 512))
                    .build(),
            )
            .attribute(
                string_attr("warehouse", "Warehouse")
                    .required()
                    .validator(StringLengthValidator::between(1, 512))
                    .build(),
            )
            .build(),
    }
}

/// One optional block per connector kind
fn section(description: &str, kind_block: fn(ConnectorKind) -> Block) -> Block {
    ConnectorKind::ALL
        .iter()
        .fold(BlockBuilder::new().description(description), |builder, kind| {
            builder.block(NestedBlock::list(kind.block_name(), kind_block(*kind)).max_items(1))
        })
        .build()
}

fn config_path() -> AttributePath {
    AttributePath::new(CONFIG).index(0)
}

fn section_path(section: &str) -> AttributePath {
    config_path().attribute(section).index(0)
}

/// Connector kinds with a non-empty block in `section`, None while any is unknown
fn configured_kinds(section: &Dynamic) -> Option<Vec<ConnectorKind>> {
    let mut kinds = Vec::new();
    for kind in ConnectorKind::ALL {
        match section.get(kind.block_name()) {
            Some(Dynamic::Unknown) => return None,
            Some(Dynamic::List(items)) if !items.is_empty() => kinds.push(kind),
            _ => {}
        }
    }
    Some(kinds)
}

/// Wraps a payload in its kind tag and decodes it as a tagged union
fn tagged<T: DeserializeOwned>(kind: ConnectorKind, payload: Value) -> converge::Result<T> {
    let mut wrapped = Map::new();
    wrapped.insert(kind.connector_type().to_string(), payload);
    serde_json::from_value(Value::Object(wrapped))
        .map_err(|e| ConvergeError::Encoding(format!("{} payload: {}", kind.connector_type(), e)))
}

fn untagged<T: Serialize>(kind: ConnectorKind, value: &T) -> converge::Result<Value> {
    let mut encoded =
        serde_json::to_value(value).map_err(|e| ConvergeError::Encoding(e.to_string()))?;
    encoded
        .get_mut(kind.connector_type())
        .map(Value::take)
        .ok_or_else(|| ConvergeError::Decoding(format!("missing {} payload", kind.connector_type())))
}

pub struct ConnectorProfileResource {
    provider_data: AwsProviderData,
    schema: Schema,
}

impl ConnectorProfileResource {
    pub fn new(provider_data: AwsProviderData) -> Self {
        Self {
            provider_data,
            schema: Self::schema_static(),
        }
    }

    pub fn schema_static() -> Schema {
        let config = BlockBuilder::new()
            .description("Connector specific configuration")
            .block(
                NestedBlock::list(
                    CREDENTIALS,
                    section("Write-only connector credentials", credentials_block),
                )
                .min_items(1)
                .max_items(1),
            )
            .block(
                NestedBlock::list(
                    PROPERTIES,
                    section("Connector connection properties", properties_block),
                )
                .min_items(1)
                .max_items(1),
            )
            .build();

        let connector_types: Vec<&str> = ConnectorKind::ALL
            .iter()
            .map(|kind| kind.connector_type())
            .collect();

        SchemaBuilder::new()
            .version(0)
            .description("Manages an AppFlow connector profile")
            .attribute(
                string_attr("arn", "ARN of the connector profile")
                    .computed()
                    .plan_modifier(UseStateForUnknown::create())
                    .build(),
            )
            .attribute(
                string_attr("connection_mode", "Public or Private")
                    .required()
                    .validator(OneOfValidator::new(&["Public", "Private"]))
                    .build(),
            )
            .attribute(
                string_attr("connector_label", "Label of a custom connector")
                    .optional()
                    .requires_replace()
                    .validator(StringLengthValidator::between(1, 256))
                    .validator(StringPatternValidator::new(
                        r"^[0-9A-Za-z][\w!@#.-]+$",
                        "must start with a letter or digit",
                    ))
                    .build(),
            )
            .attribute(
                string_attr("connector_type", "Type of connector")
                    .required()
                    .requires_replace()
                    .validator(OneOfValidator::new(&connector_types))
                    .build(),
            )
            .attribute(
                string_attr("credentials_arn", "ARN of the secret holding the credentials")
                    .computed()
                    .plan_modifier(UseStateForUnknown::create())
                    .build(),
            )
            .attribute(
                arn_attr("kms_arn", "Key encrypting the credentials")
                    .optional()
                    .computed()
                    .requires_replace()
                    .validator(StringLengthValidator::between(20, 2048))
                    .build(),
            )
            .attribute(
                string_attr("name", "Name of the connector profile")
                    .required()
                    .requires_replace()
                    .validator(StringLengthValidator::between(1, 256))
                    .validator(StringPatternValidator::new(
                        r"^[\w/!@#+=.-]+$",
                        "must contain only letters, digits and /!@#+=.-_",
                    ))
                    .build(),
            )
            .block(NestedBlock::list(CONFIG, config).min_items(1).max_items(1))
            .build()
    }

    fn arn(&self, name: &str) -> String {
        self.provider_data
            .regional_arn("appflow", &format!("connectorprofile/{}", name))
    }

    fn section_block(&self, section: &str) -> converge::Result<&Block> {
        self.schema
            .block
            .block_type(CONFIG)
            .and_then(|config| config.block.block_type(section))
            .map(|nested| &nested.block)
            .ok_or_else(|| ConvergeError::Schema(format!("{} block is not declared", section)))
    }

    fn section_payload<T: DeserializeOwned>(
        &self,
        planned: &DynamicValue,
        section: &str,
    ) -> converge::Result<T> {
        let block = self.section_block(section)?;
        let element = planned
            .get(&section_path(section))
            .ok_or_else(|| ConvergeError::Custom(format!("{} must be configured", section)))?;

        let (kind, payload) = ConnectorKind::ALL
            .into_iter()
            .find_map(|kind| {
                let nested = block.block_type(kind.block_name())?;
                let first = element.get(kind.block_name())?.as_list()?.first()?;
                Some((kind, block_payload(&nested.block, first)))
            })
            .ok_or_else(|| {
                ConvergeError::Custom(format!("{} must configure one connector block", section))
            })?;

        tagged(kind, payload)
    }

    fn profile_config(&self, planned: &DynamicValue) -> converge::Result<ConnectorProfileConfig> {
        Ok(ConnectorProfileConfig {
            connector_profile_credentials: self.section_payload(planned, CREDENTIALS)?,
            connector_profile_properties: self.section_payload(planned, PROPERTIES)?,
        })
    }

    fn flatten_properties(&self, properties: &ConnectorProperties) -> converge::Result<Dynamic> {
        let kind = properties.kind();
        let mut section = Map::new();
        section.insert(kind.block_name().to_string(), untagged(kind, properties)?);
        Ok(conform(self.section_block(PROPERTIES)?, &Value::Object(section)))
    }
}

impl ManagedResource for ConnectorProfileResource {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn schema(&self) -> Schema {
        self.schema.clone()
    }

    fn configured_identity(&self, config: &DynamicValue) -> Option<String> {
        string_at(config, &path("name"))
    }

    fn validate(&self, config: &DynamicValue) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let connector_type = string_at(config, &path("connector_type"));

        for section in [CREDENTIALS, PROPERTIES] {
            let at = section_path(section);
            let Some(kinds) = config.get(&at).and_then(configured_kinds) else {
                continue;
            };

            match kinds.as_slice() {
                [] => diags.push(
                    Diagnostic::error(
                        format!("{} must configure one connector block", section),
                        None::<String>,
                    )
                    .with_attribute(at),
                ),
                [kind] => {
                    if let Some(connector_type) = &connector_type {
                        if connector_type != kind.connector_type() {
                            diags.push(
                                Diagnostic::error(
                                    format!(
                                        "{} configures {} but connector_type is {}",
                                        section,
                                        kind.block_name(),
                                        connector_type
                                    ),
                                    None::<String>,
                                )
                                .with_attribute(at.attribute(kind.block_name())),
                            );
                        }
                    }
                }
                many => {
                    let names: Vec<&str> = many.iter().map(|k| k.block_name()).collect();
                    diags.push(
                        Diagnostic::error(
                            format!("{} configures more than one connector", section),
                            Some(names.join(", ")),
                        )
                        .with_attribute(at),
                    );
                }
            }
        }

        diags
    }

    fn expand_create(&self, planned: &DynamicValue) -> converge::Result<Value> {
        let request = CreateConnectorProfileRequest {
            name: required_string(planned, &path("name"))?,
            connector_type: required_string(planned, &path("connector_type"))?,
            connection_mode: required_string(planned, &path("connection_mode"))?,
            connector_label: string_at(planned, &path("connector_label")),
            kms_arn: string_at(planned, &path("kms_arn")),
            connector_profile_config: self.profile_config(planned)?,
        };
        serde_json::to_value(request).map_err(|e| ConvergeError::Encoding(e.to_string()))
    }

    fn expand_update(
        &self,
        _prior: &DynamicValue,
        change_set: &ChangeSet,
    ) -> converge::Result<UpdateRequest> {
        let planned = &change_set.planned_state;
        let request = UpdateConnectorProfileRequest {
            connection_mode: required_string(planned, &path("connection_mode"))?,
            connector_profile_config: self.profile_config(planned)?,
        };
        serde_json::to_value(request)
            .map(UpdateRequest::Remote)
            .map_err(|e| ConvergeError::Encoding(e.to_string()))
    }

    fn flatten(
        &self,
        identity: &str,
        remote: &Value,
        known: Option<&DynamicValue>,
    ) -> converge::Result<DynamicValue> {
        let description: ConnectorProfileDescription = if remote.is_object() {
            decode(KIND, remote)?
        } else {
            ConnectorProfileDescription::default()
        };
        let carried = |name: &str| known.and_then(|k| string_at(k, &path(name)));
        let carried_section = |section: &str| {
            known
                .and_then(|k| k.get(&config_path().attribute(section)))
                .filter(|v| v.is_wholly_known())
                .cloned()
                .unwrap_or_else(|| Dynamic::List(Vec::new()))
        };

        let credentials = carried_section(CREDENTIALS);
        let properties = match &description.connector_profile_properties {
            Some(properties) => Dynamic::List(vec![self.flatten_properties(properties)?]),
            None => carried_section(PROPERTIES),
        };

        let mut state = DynamicValue::object();
        state.set_string(
            &path("arn"),
            description
                .arn
                .or_else(|| carried("arn"))
                .unwrap_or_else(|| self.arn(identity)),
        )?;
        state.set_value(
            &path("connection_mode"),
            opt_string(description.connection_mode.or_else(|| carried("connection_mode"))),
        )?;
        state.set_value(
            &path("connector_label"),
            opt_string(description.connector_label.or_else(|| carried("connector_label"))),
        )?;
        state.set_value(
            &path("connector_type"),
            opt_string(description.connector_type.or_else(|| carried("connector_type"))),
        )?;
        state.set_value(
            &path("credentials_arn"),
            opt_string(description.credentials_arn.or_else(|| carried("credentials_arn"))),
        )?;
        state.set_value(
            &path("kms_arn"),
            opt_string(description.kms_arn.or_else(|| carried("kms_arn"))),
        )?;
        state.set_string(&path("name"), identity)?;
        state.set_list(
            &path(CONFIG),
            vec![[(CREDENTIALS.to_string(), credentials), (PROPERTIES.to_string(), properties)]
                .into_iter()
                .collect()],
        )?;

        // The service prefixes Snowflake stages with '@'
        let stage = section_path(PROPERTIES)
            .attribute(ConnectorKind::Snowflake.block_name())
            .index(0)
            .attribute("stage");
        if let (Some(read), Some(applied)) = (
            string_at(&state, &stage),
            known.and_then(|k| string_at(k, &stage)),
        ) {
            if read == format!("@{}", applied) {
                state.set_string(&stage, applied)?;
            }
        }

        Ok(state)
    }
}
