//! S3 directory bucket resource
//!
//! Directory buckets hold objects in a single zone. Every attribute the
//! service stores forces replacement; only `force_destroy` can change in
//! place, and it never leaves local state.

use crate::resources::{decode, opt_string, path, required_string, string_at};
use crate::provider_data::AwsProviderData;
use converge::defaults::StaticDefault;
use converge::plan_modifier::{DefaultFromSibling, UseStateForUnknown};
use converge::schema::{AttributeBuilder, AttributeType, BlockBuilder, NestedBlock, Schema, SchemaBuilder};
use converge::validator::{OneOfValidator, StringPatternValidator};
use converge::{AttributePath, ChangeSet, Dynamic, DynamicValue, ManagedResource, UpdateRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TYPE_NAME: &str = "aws_s3_directory_bucket";
pub const KIND: &str = "directory-buckets";

/// e.g. example--usw2-az2--x-s3
pub const BUCKET_NAME_PATTERN: &str =
    r"^(?:[0-9a-z.-]+)--(?:[0-9a-za-z]+(?:-[0-9a-za-z]+)+)--x-s3$";

const LOCATION_AVAILABILITY_ZONE: &str = "AvailabilityZone";
const LOCATION_LOCAL_ZONE: &str = "LocalZone";
const SINGLE_AVAILABILITY_ZONE: &str = "SingleAvailabilityZone";
const SINGLE_LOCAL_ZONE: &str = "SingleLocalZone";
const BUCKET_TYPE_DIRECTORY: &str = "Directory";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub location_type: String,
}

#[derive(Debug, Serialize)]
struct CreateBucketRequest {
    bucket: String,
    #[serde(rename = "type")]
    bucket_type: String,
    data_redundancy: String,
    location: LocationInfo,
}

#[derive(Debug, Default, Deserialize)]
struct BucketDescription {
    #[serde(default)]
    location: Option<LocationInfo>,
    #[serde(default)]
    data_redundancy: Option<String>,
    #[serde(default, rename = "type")]
    bucket_type: Option<String>,
}

/// Redundancy a bucket gets when none is configured
pub fn default_data_redundancy(location_type: &str) -> &'static str {
    match location_type {
        LOCATION_LOCAL_ZONE => SINGLE_LOCAL_ZONE,
        _ => SINGLE_AVAILABILITY_ZONE,
    }
}

pub struct DirectoryBucketResource {
    provider_data: AwsProviderData,
}

impl DirectoryBucketResource {
    pub fn new(provider_data: AwsProviderData) -> Self {
        Self { provider_data }
    }

    pub fn schema_static() -> Schema {
        let location = BlockBuilder::new()
            .description("Bucket location")
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .description("Availability Zone ID or Local Zone ID")
                    .required()
                    .requires_replace()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("Location type")
                    .optional()
                    .computed()
                    .requires_replace()
                    .default(StaticDefault::string(LOCATION_AVAILABILITY_ZONE))
                    .validator(OneOfValidator::new(&[
                        LOCATION_AVAILABILITY_ZONE,
                        LOCATION_LOCAL_ZONE,
                    ]))
                    .build(),
            )
            .build();

        SchemaBuilder::new()
            .version(0)
            .description("Manages an S3 directory bucket")
            .attribute(
                AttributeBuilder::new("arn", AttributeType::String)
                    .description("ARN of the bucket")
                    .computed()
                    .plan_modifier(UseStateForUnknown::create())
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("bucket", AttributeType::String)
                    .description("Name of the bucket")
                    .required()
                    .requires_replace()
                    .validator(StringPatternValidator::new(
                        BUCKET_NAME_PATTERN,
                        "must be in the format [bucket_name]--[azid]--x-s3. Use the aws_s3_bucket resource to manage general purpose buckets",
                    ))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("data_redundancy", AttributeType::String)
                    .description("Data redundancy; derived from the location type when not set")
                    .optional()
                    .computed()
                    .requires_replace()
                    .validator(OneOfValidator::new(&[
                        SINGLE_AVAILABILITY_ZONE,
                        SINGLE_LOCAL_ZONE,
                    ]))
                    .plan_modifier(DefaultFromSibling::create(
                        AttributePath::new("location").index(0).attribute("type"),
                        |location_type| {
                            Dynamic::from(default_data_redundancy(
                                location_type.as_string().unwrap_or_default(),
                            ))
                        },
                    ))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("force_destroy", AttributeType::Bool)
                    .description("Empty the bucket before deleting it")
                    .optional()
                    .computed()
                    .default(StaticDefault::bool(false))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .description("Same as bucket")
                    .computed()
                    .deprecated()
                    .plan_modifier(UseStateForUnknown::create())
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("type", AttributeType::String)
                    .description("Bucket type")
                    .optional()
                    .computed()
                    .requires_replace()
                    .default(StaticDefault::string(BUCKET_TYPE_DIRECTORY))
                    .validator(OneOfValidator::new(&[BUCKET_TYPE_DIRECTORY]))
                    .build(),
            )
            .block(NestedBlock::list("location", location).min_items(1).max_items(1))
            .build()
    }

    fn arn(&self, bucket: &str) -> String {
        self.provider_data
            .regional_arn("s3express", &format!("bucket/{}", bucket))
    }
}

fn location_of(value: &DynamicValue) -> Option<LocationInfo> {
    let first = AttributePath::new("location").index(0);
    Some(LocationInfo {
        name: string_at(value, &first.clone().attribute("name"))?,
        location_type: string_at(value, &first.attribute("type"))
            .unwrap_or_else(|| LOCATION_AVAILABILITY_ZONE.to_string()),
    })
}

impl ManagedResource for DirectoryBucketResource {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn kind(&self) -> &str {
        KIND
    }

    fn schema(&self) -> Schema {
        Self::schema_static()
    }

    fn configured_identity(&self, config: &DynamicValue) -> Option<String> {
        string_at(config, &path("bucket"))
    }

    fn expand_create(&self, planned: &DynamicValue) -> converge::Result<Value> {
        let location = location_of(planned)
            .ok_or_else(|| converge::ConvergeError::Custom("location name must be known".into()))?;
        let request = CreateBucketRequest {
            bucket: required_string(planned, &path("bucket"))?,
            bucket_type: string_at(planned, &path("type"))
                .unwrap_or_else(|| BUCKET_TYPE_DIRECTORY.to_string()),
            data_redundancy: string_at(planned, &path("data_redundancy")).unwrap_or_else(|| {
                default_data_redundancy(&location.location_type).to_string()
            }),
            location,
        };
        serde_json::to_value(request).map_err(|e| converge::ConvergeError::Encoding(e.to_string()))
    }

    fn expand_update(
        &self,
        _prior: &DynamicValue,
        _change_set: &ChangeSet,
    ) -> converge::Result<UpdateRequest> {
        Ok(UpdateRequest::StateOnly)
    }

    fn flatten(
        &self,
        identity: &str,
        remote: &Value,
        known: Option<&DynamicValue>,
    ) -> converge::Result<DynamicValue> {
        let description: BucketDescription = if remote.is_object() {
            decode(KIND, remote)?
        } else {
            BucketDescription::default()
        };

        let location = description
            .location
            .or_else(|| known.and_then(location_of));
        let data_redundancy = description.data_redundancy.or_else(|| {
            location
                .as_ref()
                .map(|l| default_data_redundancy(&l.location_type).to_string())
        });
        let force_destroy = known
            .and_then(|k| k.get(&path("force_destroy")))
            .and_then(Dynamic::as_bool)
            .unwrap_or(false);

        let mut state = DynamicValue::object();
        state.set_string(&path("arn"), self.arn(identity))?;
        state.set_string(&path("bucket"), identity)?;
        state.set_value(&path("data_redundancy"), opt_string(data_redundancy))?;
        state.set_bool(&path("force_destroy"), force_destroy)?;
        state.set_string(&path("id"), identity)?;
        state.set_string(
            &path("type"),
            description
                .bucket_type
                .unwrap_or_else(|| BUCKET_TYPE_DIRECTORY.to_string()),
        )?;
        let locations = location
            .map(|l| {
                vec![[
                    ("name".to_string(), l.name),
                    ("type".to_string(), l.location_type),
                ]
                .into_iter()
                .collect::<Dynamic>()]
            })
            .unwrap_or_default();
        state.set_list(&path("location"), locations)?;

        Ok(state)
    }

    fn force_destroy(&self, state: &DynamicValue) -> bool {
        state
            .get(&path("force_destroy"))
            .and_then(Dynamic::as_bool)
            .unwrap_or(false)
    }
}
