//! Provider data passed to resources

use crate::api::Client;
use std::sync::Arc;

#[derive(Clone)]
pub struct AwsProviderData {
    pub client: Arc<Client>,
    pub region: String,
    pub account_id: String,
}

impl AwsProviderData {
    pub fn new(client: Client, region: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            client: Arc::new(client),
            region: region.into(),
            account_id: account_id.into(),
        }
    }

    /// ARN of a regional resource, e.g. `arn:aws:s3express:us-west-2:123456789012:bucket/b`
    pub fn regional_arn(&self, service: &str, resource: &str) -> String {
        format!(
            "arn:aws:{}:{}:{}:{}",
            service, self.region, self.account_id, resource
        )
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn regional_arn_includes_region_and_account() {
        let data = AwsProviderData::new(
            Client::new("https://localhost:8443", "t", false).unwrap(),
            "us-west-2",
            "123456789012",
        );
        assert_eq!(
            data.regional_arn("s3express", "bucket/b--usw2-az1--x-s3"),
            "arn:aws:s3express:us-west-2:123456789012:bucket/b--usw2-az1--x-s3"
        );
    }
}
