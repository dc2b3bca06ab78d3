use aws::resources::appflow::connector_profile;
use aws::resources::s3::directory_bucket;
use aws::AwsProvider;
use converge::{
    AttributePath, Context, ConvergeError, Dynamic, DynamicValue, LifecycleState, PlannedAction,
    Provider,
};
use mockito::{Matcher, Server, ServerGuard};
use serde_json::{json, Value};

const BUCKET: &str = "logs--usw2-az2--x-s3";

async fn configured_provider(server: &ServerGuard) -> AwsProvider {
    let config = DynamicValue::new(Dynamic::from_json(&json!({
        "endpoint": server.url(),
        "api_token": "secret-token",
        "region": "us-west-2",
        "account_id": "123456789012",
        "max_retries": 0
    })));

    let mut provider = AwsProvider::new();
    let diags = provider.configure(&Context::new(), config).await;
    assert!(!diags.has_errors(), "{}", diags);
    provider
}

fn desired(value: Value) -> DynamicValue {
    DynamicValue::new(Dynamic::from_json(&value))
}

fn bucket_config(force_destroy: bool) -> DynamicValue {
    desired(json!({
        "bucket": BUCKET,
        "force_destroy": force_destroy,
        "location": [{"name": "usw2-az2"}]
    }))
}

fn bucket_description() -> String {
    json!({
        "bucket": BUCKET,
        "type": "Directory",
        "data_redundancy": "SingleAvailabilityZone",
        "location": {"name": "usw2-az2", "type": "AvailabilityZone"}
    })
    .to_string()
}

fn path(name: &str) -> AttributePath {
    AttributePath::new(name)
}

#[tokio::test(flavor = "multi_thread")]
async fn directory_bucket_lifecycle_with_mock_server() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/directory-buckets")
        .match_header("authorization", "Bearer secret-token")
        .match_body(Matcher::Json(json!({
            "bucket": BUCKET,
            "type": "Directory",
            "data_redundancy": "SingleAvailabilityZone",
            "location": {"name": "usw2-az2", "type": "AvailabilityZone"}
        })))
        .with_status(200)
        .with_body(json!({"bucket": BUCKET}).to_string())
        .create_async()
        .await;
    let read = server
        .mock("GET", format!("/directory-buckets/{}", BUCKET).as_str())
        .with_body(bucket_description())
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let mut executor = provider.executor(directory_bucket::TYPE_NAME).unwrap();
    let ctx = Context::new();

    let action = executor.converge(&ctx, &bucket_config(false)).await.unwrap();
    assert_eq!(action, PlannedAction::Create);
    create.assert_async().await;
    read.assert_async().await;

    let state = executor.state().unwrap();
    assert_eq!(state.identity, BUCKET);
    assert_eq!(
        state.attributes.get_string(&path("arn")).unwrap(),
        format!("arn:aws:s3express:us-west-2:123456789012:bucket/{}", BUCKET)
    );

    // Same configuration again plans nothing
    let again = executor.plan(&bucket_config(false)).unwrap();
    assert_eq!(again.action(), PlannedAction::NoOp, "{}", again);

    // force_destroy only changes local state
    let action = executor.converge(&ctx, &bucket_config(true)).await.unwrap();
    assert_eq!(action, PlannedAction::Update);
    assert!(executor
        .state()
        .unwrap()
        .attributes
        .get_bool(&path("force_destroy"))
        .unwrap());
    read.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn force_destroy_drains_then_deletes() {
    let mut server = Server::new_async().await;
    let object_path = format!("/directory-buckets/{}", BUCKET);
    let refused = server
        .mock("DELETE", object_path.as_str())
        .with_status(409)
        .with_body(r#"{"code":"BucketNotEmpty","message":"The bucket you tried to delete is not empty"}"#)
        .expect(1)
        .create_async()
        .await;
    let list = server
        .mock("GET", format!("{}/objects", object_path).as_str())
        .with_body(r#"{"objects":[{"key":"a.log"},{"key":"b.log"}],"is_truncated":false}"#)
        .create_async()
        .await;
    let batch = server
        .mock("POST", format!("{}/objects/delete", object_path).as_str())
        .match_body(Matcher::Json(json!({"keys": ["a.log", "b.log"]})))
        .with_body(r#"{"deleted":2,"errors":[]}"#)
        .create_async()
        .await;
    let deleted = server
        .mock("DELETE", object_path.as_str())
        .with_status(204)
        .expect(1)
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let resource = provider.resource(directory_bucket::TYPE_NAME).unwrap();
    let state = converge::ResourceState::new(
        directory_bucket::TYPE_NAME,
        BUCKET,
        0,
        resource
            .flatten(BUCKET, &Value::Null, Some(&bucket_config(true)))
            .unwrap(),
    )
    .unwrap();
    let mut executor = provider
        .executor(directory_bucket::TYPE_NAME)
        .unwrap()
        .with_state(Some(state));

    executor.delete(&Context::new()).await.unwrap();

    assert_eq!(executor.status(), LifecycleState::Absent);
    assert!(executor.state().is_none());
    refused.assert_async().await;
    list.assert_async().await;
    batch.assert_async().await;
    deleted.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn not_empty_bucket_without_force_destroy_is_kept() {
    let mut server = Server::new_async().await;
    let refused = server
        .mock("DELETE", format!("/directory-buckets/{}", BUCKET).as_str())
        .with_status(409)
        .with_body(r#"{"code":"BucketNotEmpty","message":"not empty"}"#)
        .expect(1)
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let resource = provider.resource(directory_bucket::TYPE_NAME).unwrap();
    let state = converge::ResourceState::new(
        directory_bucket::TYPE_NAME,
        BUCKET,
        0,
        resource
            .flatten(BUCKET, &Value::Null, Some(&bucket_config(false)))
            .unwrap(),
    )
    .unwrap();
    let mut executor = provider
        .executor(directory_bucket::TYPE_NAME)
        .unwrap()
        .with_state(Some(state));

    let err = executor.delete(&Context::new()).await.unwrap_err();

    assert!(matches!(err, ConvergeError::Remote { .. }), "{}", err);
    assert_eq!(executor.status(), LifecycleState::Error);
    assert_eq!(executor.state().unwrap().identity, BUCKET);
    refused.assert_async().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_bucket_name_never_reaches_the_server() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/directory-buckets")
        .expect(0)
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let mut executor = provider.executor(directory_bucket::TYPE_NAME).unwrap();
    let config = desired(json!({"bucket": "my-bucket", "location": [{"name": "usw2-az2"}]}));

    let err = executor.converge(&Context::new(), &config).await.unwrap_err();

    assert!(matches!(err, ConvergeError::Validation(_)), "{}", err);
    assert_eq!(executor.status(), LifecycleState::Absent);
    create.assert_async().await;
}

fn datadog_profile(connection_mode: &str) -> DynamicValue {
    desired(json!({
        "name": "metrics",
        "connector_type": "Datadog",
        "connection_mode": connection_mode,
        "connector_profile_config": [{
            "connector_profile_credentials": [{
                "datadog": [{"api_key": "dd-api-key", "application_key": "dd-app-key"}]
            }],
            "connector_profile_properties": [{
                "datadog": [{"instance_url": "https://api.datadoghq.com"}]
            }]
        }]
    }))
}

fn profile_description(connection_mode: &str) -> String {
    json!({
        "arn": "arn:aws:appflow:us-west-2:123456789012:connectorprofile/metrics",
        "name": "metrics",
        "connector_type": "Datadog",
        "connection_mode": connection_mode,
        "credentials_arn": "arn:aws:secretsmanager:us-west-2:123456789012:secret:appflow!metrics",
        "connector_profile_properties": {
            "Datadog": {"instance_url": "https://api.datadoghq.com"}
        }
    })
    .to_string()
}

#[tokio::test(flavor = "multi_thread")]
async fn connector_profile_create_and_update_with_mock_server() {
    let mut server = Server::new_async().await;
    let create = server
        .mock("POST", "/connector-profiles")
        .match_body(Matcher::PartialJson(json!({
            "name": "metrics",
            "connector_type": "Datadog",
            "connector_profile_config": {
                "connector_profile_credentials": {
                    "Datadog": {"api_key": "dd-api-key", "application_key": "dd-app-key"}
                },
                "connector_profile_properties": {
                    "Datadog": {"instance_url": "https://api.datadoghq.com"}
                }
            }
        })))
        .with_status(201)
        .with_body(r#"{"arn":"arn:aws:appflow:us-west-2:123456789012:connectorprofile/metrics"}"#)
        .create_async()
        .await;
    let first_read = server
        .mock("GET", "/connector-profiles/metrics")
        .with_body(profile_description("Public"))
        .expect(1)
        .create_async()
        .await;
    let update = server
        .mock("PATCH", "/connector-profiles/metrics")
        .match_body(Matcher::PartialJson(json!({
            "connection_mode": "Private",
            "connector_profile_config": {
                "connector_profile_credentials": {"Datadog": {"api_key": "dd-api-key"}}
            }
        })))
        .with_status(200)
        .with_body("{}")
        .create_async()
        .await;
    let second_read = server
        .mock("GET", "/connector-profiles/metrics")
        .with_body(profile_description("Private"))
        .expect(1)
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let mut executor = provider.executor(connector_profile::TYPE_NAME).unwrap();
    let ctx = Context::new();

    let action = executor.converge(&ctx, &datadog_profile("Public")).await.unwrap();
    assert_eq!(action, PlannedAction::Create);
    create.assert_async().await;
    first_read.assert_async().await;

    let state = executor.state().unwrap();
    assert_eq!(state.identity, "metrics");
    assert_eq!(
        state
            .attributes
            .get_string(
                &path("connector_profile_config")
                    .index(0)
                    .attribute("connector_profile_credentials")
                    .index(0)
                    .attribute("datadog")
                    .index(0)
                    .attribute("api_key")
            )
            .unwrap(),
        "dd-api-key"
    );

    let noop = executor.plan(&datadog_profile("Public")).unwrap();
    assert_eq!(noop.action(), PlannedAction::NoOp, "{}", noop);

    let action = executor.converge(&ctx, &datadog_profile("Private")).await.unwrap();
    assert_eq!(action, PlannedAction::Update);
    update.assert_async().await;
    second_read.assert_async().await;
    assert_eq!(
        executor
            .state()
            .unwrap()
            .attributes
            .get_string(&path("connection_mode"))
            .unwrap(),
        "Private"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn vanished_connector_profile_is_dropped_on_refresh() {
    let mut server = Server::new_async().await;
    let _gone = server
        .mock("GET", "/connector-profiles/metrics")
        .with_status(404)
        .with_body(r#"{"code":"ResourceNotFoundException","message":"no such profile"}"#)
        .create_async()
        .await;

    let provider = configured_provider(&server).await;
    let resource = provider.resource(connector_profile::TYPE_NAME).unwrap();
    let attributes = resource
        .flatten(
            "metrics",
            &serde_json::from_str(&profile_description("Public")).unwrap(),
            None,
        )
        .unwrap();
    let state =
        converge::ResourceState::new(connector_profile::TYPE_NAME, "metrics", 0, attributes)
            .unwrap();
    let mut executor = provider
        .executor(connector_profile::TYPE_NAME)
        .unwrap()
        .with_state(Some(state));

    let outcome = executor.read(&Context::new()).await.unwrap();

    assert_eq!(outcome, converge::ReadOutcome::Removed);
    assert_eq!(executor.status(), LifecycleState::Absent);
}
