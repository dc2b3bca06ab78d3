pub mod connector_profile;

pub use connector_profile::{
    ConnectorCredentials, ConnectorKind, ConnectorProfileResource, ConnectorProperties,
};
