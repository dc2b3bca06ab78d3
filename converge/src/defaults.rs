//! Default value providers for attributes
//!
//! Defaults are evaluated during planning when an optional+computed attribute
//! is absent from configuration (or explicitly null). They run before plan
//! modifiers, so a modifier always sees the defaulted value.
//!
//! # Examples
//!
//! ```no_run
//! use converge::schema::{AttributeBuilder, AttributeType};
//! use converge::defaults::StaticDefault;
//!
//! let force_destroy = AttributeBuilder::new("force_destroy", AttributeType::Bool)
//!     .optional()
//!     .computed()
//!     .default(StaticDefault::bool(false))
//!     .build();
//! ```

use crate::types::{AttributePath, Dynamic};

pub struct DefaultRequest {
    pub path: AttributePath,
}

pub struct DefaultResponse {
    pub value: Dynamic,
}

/// AttributeDefault supplies a value for an attribute missing from configuration
pub trait AttributeDefault: Send + Sync {
    fn description(&self) -> String;
    fn default_value(&self, request: DefaultRequest) -> DefaultResponse;
}

/// StaticDefault provides a static default value
pub struct StaticDefault {
    value: Dynamic,
}

impl StaticDefault {
    pub fn create(value: Dynamic) -> Box<dyn AttributeDefault> {
        Box::new(Self { value })
    }

    pub fn string(value: &str) -> Box<dyn AttributeDefault> {
        Self::create(Dynamic::String(value.to_string()))
    }

    pub fn bool(value: bool) -> Box<dyn AttributeDefault> {
        Self::create(Dynamic::Bool(value))
    }
}

impl AttributeDefault for StaticDefault {
    fn description(&self) -> String {
        format!("static default value: {}", self.value)
    }

    fn default_value(&self, _request: DefaultRequest) -> DefaultResponse {
        DefaultResponse {
            value: self.value.clone(),
        }
    }
}
