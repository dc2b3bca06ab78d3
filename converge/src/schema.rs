//! Schema types and builders for converge
//!
//! This module provides the schema system resources use to declare their
//! attributes, nested blocks, types, presence flags and validation.

use crate::defaults::AttributeDefault;
use crate::error::{ConvergeError, Result};
use crate::plan_modifier::PlanModifier;
use crate::types::Dynamic;
use crate::validator::Validator;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// AttributeType defines the semantic type of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeType {
    String,
    Bool,
    Int,
    Number,
    List(Box<AttributeType>),                // Ordered, allows duplicates
    Set(Box<AttributeType>),                 // Unordered, no duplicates
    Map(Box<AttributeType>),                 // String keys only
    Object(BTreeMap<String, AttributeType>), // Fixed structure
}

impl AttributeType {
    /// Checks a value against this type; null and unknown fit any type
    pub fn accepts(&self, value: &Dynamic) -> bool {
        match (value, self) {
            (Dynamic::Null | Dynamic::Unknown, _) => true,
            (Dynamic::String(_), AttributeType::String) => true,
            (Dynamic::Bool(_), AttributeType::Bool) => true,
            (Dynamic::Int(_), AttributeType::Int | AttributeType::Number) => true,
            (Dynamic::Number(n), AttributeType::Int) => n.fract() == 0.0,
            (Dynamic::Number(_), AttributeType::Number) => true,
            (Dynamic::List(list), AttributeType::List(elem_type)) => {
                list.iter().all(|elem| elem_type.accepts(elem))
            }
            (Dynamic::List(list), AttributeType::Set(elem_type)) => {
                list.iter().all(|elem| elem_type.accepts(elem))
                    && list.iter().enumerate().all(|(i, a)| {
                        list.iter()
                            .skip(i + 1)
                            .all(|b| !(a.is_wholly_known() && a.equivalent(b)))
                    })
            }
            (Dynamic::Map(map), AttributeType::Map(elem_type)) => {
                map.values().all(|elem| elem_type.accepts(elem))
            }
            (Dynamic::Map(map), AttributeType::Object(attrs)) => {
                map.keys().all(|k| attrs.contains_key(k))
                    && attrs
                        .iter()
                        .all(|(name, ty)| map.get(name).map_or(true, |v| ty.accepts(v)))
            }
            _ => false,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            AttributeType::String => "string".to_string(),
            AttributeType::Bool => "bool".to_string(),
            AttributeType::Int => "int".to_string(),
            AttributeType::Number => "number".to_string(),
            AttributeType::List(t) => format!("list({})", t.describe()),
            AttributeType::Set(t) => format!("set({})", t.describe()),
            AttributeType::Map(t) => format!("map({})", t.describe()),
            AttributeType::Object(_) => "object".to_string(),
        }
    }
}

/// Presence mode an attribute's flags resolve to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    OptionalComputed,
    Computed,
}

/// Schema is returned by resources
/// Version is stored with state so old records can be recognised
#[derive(Debug, Clone)]
pub struct Schema {
    pub version: i64,
    pub block: Block, // Root block containing all attributes
}

impl Schema {
    /// Checks the structural invariants of the whole schema tree
    pub fn validate_definition(&self) -> Result<()> {
        self.block.validate_definition("")
    }
}

/// Block represents one level of attributes and nested blocks
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub attributes: Vec<Attribute>,
    pub block_types: Vec<NestedBlock>,
    pub description: String,
    pub deprecated: bool,
}

impl Block {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn block_type(&self, name: &str) -> Option<&NestedBlock> {
        self.block_types.iter().find(|b| b.type_name == name)
    }

    fn validate_definition(&self, prefix: &str) -> Result<()> {
        let mut seen = HashSet::new();
        let names = self
            .attributes
            .iter()
            .map(|a| a.name.as_str())
            .chain(self.block_types.iter().map(|b| b.type_name.as_str()));
        for name in names {
            if !seen.insert(name) {
                return Err(ConvergeError::Schema(format!(
                    "duplicate name '{}{}'",
                    prefix, name
                )));
            }
        }

        for attr in &self.attributes {
            let presence = attr.presence().ok_or_else(|| {
                ConvergeError::Schema(format!(
                    "attribute '{}{}' must be exactly one of required, optional, optional+computed or computed",
                    prefix, attr.name
                ))
            })?;
            if attr.default.is_some() && presence != Presence::OptionalComputed {
                return Err(ConvergeError::Schema(format!(
                    "attribute '{}{}' has a default but is not optional+computed",
                    prefix, attr.name
                )));
            }
        }

        for nested in &self.block_types {
            if nested.max_items > 0 && nested.min_items > nested.max_items {
                return Err(ConvergeError::Schema(format!(
                    "block '{}{}' has min_items {} above max_items {}",
                    prefix, nested.type_name, nested.min_items, nested.max_items
                )));
            }
            nested
                .block
                .validate_definition(&format!("{}{}.", prefix, nested.type_name))?;
        }

        Ok(())
    }
}

/// Attribute represents a single configuration attribute
#[derive(Clone)]
pub struct Attribute {
    pub name: String,
    pub r#type: AttributeType,
    pub description: String,
    pub required: bool,
    pub optional: bool,
    pub computed: bool,
    pub sensitive: bool,
    /// A change to a known value destroys and recreates the whole object
    pub requires_replace: bool,
    pub deprecated: bool,
    pub validators: Vec<Arc<dyn Validator>>,
    pub plan_modifiers: Vec<Arc<dyn PlanModifier>>,
    pub default: Option<Arc<dyn AttributeDefault>>,
}

impl Attribute {
    pub fn presence(&self) -> Option<Presence> {
        match (self.required, self.optional, self.computed) {
            (true, false, false) => Some(Presence::Required),
            (false, true, false) => Some(Presence::Optional),
            (false, true, true) => Some(Presence::OptionalComputed),
            (false, false, true) => Some(Presence::Computed),
            _ => None,
        }
    }

    pub fn is_computed_only(&self) -> bool {
        self.presence() == Some(Presence::Computed)
    }
}

// Manual Debug implementation since validators/modifiers don't implement Debug
impl std::fmt::Debug for Attribute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attribute")
            .field("name", &self.name)
            .field("type", &self.r#type)
            .field("required", &self.required)
            .field("optional", &self.optional)
            .field("computed", &self.computed)
            .field("sensitive", &self.sensitive)
            .field("requires_replace", &self.requires_replace)
            .field(
                "validators",
                &format!("{} validators", self.validators.len()),
            )
            .field(
                "plan_modifiers",
                &format!("{} plan modifiers", self.plan_modifiers.len()),
            )
            .field("default", &self.default.is_some())
            .finish()
    }
}

/// NestedBlock represents a nested configuration block
#[derive(Debug, Clone)]
pub struct NestedBlock {
    pub type_name: String,
    pub block: Block,
    pub nesting: NestingMode,
    pub min_items: usize,
    /// Zero means unbounded
    pub max_items: usize,
}

impl NestedBlock {
    pub fn list(type_name: &str, block: Block) -> Self {
        Self {
            type_name: type_name.to_string(),
            block,
            nesting: NestingMode::List,
            min_items: 0,
            max_items: 0,
        }
    }

    pub fn single(type_name: &str, block: Block) -> Self {
        Self {
            type_name: type_name.to_string(),
            block,
            nesting: NestingMode::Single,
            min_items: 0,
            max_items: 1,
        }
    }

    pub fn min_items(mut self, min: usize) -> Self {
        self.min_items = min;
        self
    }

    pub fn max_items(mut self, max: usize) -> Self {
        self.max_items = max;
        self
    }
}

/// NestingMode defines how nested block values are shaped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NestingMode {
    /// A single object value
    Single,
    /// A list of objects
    List,
    /// An unordered collection of objects, planned like a list
    Set,
}

/// AttributeBuilder provides fluent API for building attributes
/// ALWAYS use this instead of constructing Attribute directly
pub struct AttributeBuilder {
    attribute: Attribute,
}

impl AttributeBuilder {
    pub fn new(name: &str, type_: AttributeType) -> Self {
        Self {
            attribute: Attribute {
                name: name.to_string(),
                r#type: type_,
                description: String::new(),
                required: false,
                optional: false,
                computed: false,
                sensitive: false,
                requires_replace: false,
                deprecated: false,
                validators: Vec::new(),
                plan_modifiers: Vec::new(),
                default: None,
            },
        }
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.attribute.description = desc.to_string();
        self
    }

    pub fn required(mut self) -> Self {
        self.attribute.required = true;
        self.attribute.optional = false;
        self
    }

    pub fn optional(mut self) -> Self {
        self.attribute.optional = true;
        self.attribute.required = false;
        self
    }

    pub fn computed(mut self) -> Self {
        self.attribute.computed = true;
        self
    }

    /// Mark as sensitive (masked when a plan is rendered)
    pub fn sensitive(mut self) -> Self {
        self.attribute.sensitive = true;
        self
    }

    /// Changing a known value forces destroy and recreate
    pub fn requires_replace(mut self) -> Self {
        self.attribute.requires_replace = true;
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.attribute.deprecated = true;
        self
    }

    pub fn validator(mut self, validator: Box<dyn Validator>) -> Self {
        self.attribute.validators.push(Arc::from(validator));
        self
    }

    pub fn plan_modifier(mut self, modifier: Box<dyn PlanModifier>) -> Self {
        self.attribute.plan_modifiers.push(Arc::from(modifier));
        self
    }

    pub fn default(mut self, default: Box<dyn AttributeDefault>) -> Self {
        self.attribute.default = Some(Arc::from(default));
        self
    }

    pub fn build(self) -> Attribute {
        self.attribute
    }
}

/// BlockBuilder builds the body of a nested block
#[derive(Default)]
pub struct BlockBuilder {
    block: Block,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.block.attributes.push(attr);
        self
    }

    pub fn block(mut self, block: NestedBlock) -> Self {
        self.block.block_types.push(block);
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.block.description = desc.to_string();
        self
    }

    pub fn build(self) -> Block {
        self.block
    }
}

/// SchemaBuilder provides fluent API for building schemas
/// ALWAYS use this for consistency
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            schema: Schema {
                version: 0,
                block: Block::default(),
            },
        }
    }

    pub fn version(mut self, version: i64) -> Self {
        self.schema.version = version;
        self
    }

    pub fn attribute(mut self, attr: Attribute) -> Self {
        self.schema.block.attributes.push(attr);
        self
    }

    pub fn block(mut self, block: NestedBlock) -> Self {
        self.schema.block.block_types.push(block);
        self
    }

    pub fn description(mut self, desc: &str) -> Self {
        self.schema.block.description = desc.to_string();
        self
    }

    pub fn deprecated(mut self) -> Self {
        self.schema.block.deprecated = true;
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}

impl std::default::Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::StaticDefault;

    #[test]
    fn attribute_builder_creates_required_string() {
        let attr = AttributeBuilder::new("name", AttributeType::String)
            .description("The name of the resource")
            .required()
            .build();

        assert_eq!(attr.name, "name");
        assert!(matches!(attr.r#type, AttributeType::String));
        assert_eq!(attr.presence(), Some(Presence::Required));
        assert_eq!(attr.description, "The name of the resource");
    }

    #[test]
    fn schema_builder_creates_schema_with_attributes() {
        let schema = SchemaBuilder::new()
            .version(1)
            .description("Test resource schema")
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .computed()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .required()
                    .build(),
            )
            .build();

        assert_eq!(schema.version, 1);
        assert_eq!(schema.block.attributes.len(), 2);
        assert!(schema.validate_definition().is_ok());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let schema = SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("location", AttributeType::String)
                    .optional()
                    .build(),
            )
            .block(NestedBlock::list("location", Block::default()))
            .build();

        let err = schema.validate_definition().unwrap_err();
        assert!(err.to_string().contains("duplicate name 'location'"));
    }

    #[test]
    fn presence_flags_must_form_one_mode() {
        let schema = SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .required()
                    .computed()
                    .build(),
            )
            .build();
        assert!(schema.validate_definition().is_err());

        let schema = SchemaBuilder::new()
            .attribute(AttributeBuilder::new("bare", AttributeType::String).build())
            .build();
        assert!(schema.validate_definition().is_err());
    }

    #[test]
    fn default_requires_optional_computed() {
        let schema = SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("force_destroy", AttributeType::Bool)
                    .optional()
                    .default(StaticDefault::bool(false))
                    .build(),
            )
            .build();
        assert!(schema.validate_definition().is_err());
    }

    #[test]
    fn nested_definition_errors_carry_block_prefix() {
        let inner = BlockBuilder::new()
            .attribute(AttributeBuilder::new("name", AttributeType::String).build())
            .build();
        let schema = SchemaBuilder::new()
            .block(NestedBlock::list("location", inner).max_items(1))
            .build();

        let err = schema.validate_definition().unwrap_err();
        assert!(err.to_string().contains("location.name"));
    }

    #[test]
    fn type_checks_cover_collections() {
        let list = AttributeType::List(Box::new(AttributeType::Int));
        assert!(list.accepts(&Dynamic::List(vec![Dynamic::Int(1), Dynamic::Unknown])));
        assert!(!list.accepts(&Dynamic::List(vec![Dynamic::String("x".into())])));

        let set = AttributeType::Set(Box::new(AttributeType::String));
        assert!(!set.accepts(&Dynamic::List(vec![
            Dynamic::String("a".into()),
            Dynamic::String("a".into())
        ])));

        let object = AttributeType::Object(BTreeMap::from([
            ("host".to_string(), AttributeType::String),
            ("port".to_string(), AttributeType::Int),
        ]));
        let value: Dynamic = [
            ("host".to_string(), Dynamic::from("localhost")),
            ("port".to_string(), Dynamic::Int(8080)),
        ]
        .into_iter()
        .collect();
        assert!(object.accepts(&value));
        assert!(!AttributeType::Int.accepts(&Dynamic::Number(1.5)));
    }
}
