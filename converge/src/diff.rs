//! Diff engine
//!
//! Turns desired configuration plus the prior state into a [`ChangeSet`]:
//! a planned state, a per-attribute classification, and the action the
//! lifecycle executor has to take.
//!
//! Planning runs in passes over every attribute site (including attributes
//! inside nested block elements):
//! 1. plan values from configuration, defaults and prior state
//! 2. mark computed-only attributes pending when anything else changes
//! 3. run plan modifiers in declaration order
//! 4. run sibling-dependent modifiers in dependency order
//! 5. classify each site against the prior state

use crate::defaults::DefaultRequest;
use crate::error::{ConvergeError, Result};
use crate::plan_modifier::PlanModifyRequest;
use crate::schema::{Attribute, Block, NestingMode, Presence, Schema};
use crate::state::ResourceState;
use crate::types::{AttributePath, Diagnostic, Diagnostics, Dynamic, DynamicValue};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

/// Planned change for a single attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeChange {
    Unchanged,
    Set(Dynamic),
    /// Value will only be known once the change is applied
    ComputedPending,
    /// Changes to this value force the whole object to be replaced
    RequiresReplacement(Dynamic),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDiff {
    pub path: AttributePath,
    pub change: AttributeChange,
    /// Value in the prior state, null on create
    pub prior: Dynamic,
    pub sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlannedAction {
    Create,
    Update,
    /// Delete then create
    Replace,
    NoOp,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlannedAction::Create => "create",
            PlannedAction::Update => "update in-place",
            PlannedAction::Replace => "destroy and then create replacement",
            PlannedAction::NoOp => "no changes",
        };
        f.write_str(name)
    }
}

/// Result of diffing desired configuration against prior state
/// Never persisted; a stale change set is rejected by the executor
#[derive(Debug, Clone)]
pub struct ChangeSet {
    /// Identity of the state this was computed against, None on create
    pub prior_identity: Option<String>,
    /// Configuration the plan was computed from
    pub config: DynamicValue,
    pub planned_state: DynamicValue,
    pub diffs: Vec<AttributeDiff>,
    pub requires_replacement: bool,
    /// Attributes that forced replacement
    pub replace_paths: Vec<AttributePath>,
    pub warnings: Vec<Diagnostic>,
}

impl ChangeSet {
    pub fn action(&self) -> PlannedAction {
        if self.prior_identity.is_none() {
            PlannedAction::Create
        } else if self.requires_replacement {
            PlannedAction::Replace
        } else if self.is_noop() {
            PlannedAction::NoOp
        } else {
            PlannedAction::Update
        }
    }

    pub fn is_noop(&self) -> bool {
        self.diffs
            .iter()
            .all(|d| d.change == AttributeChange::Unchanged)
    }

    pub fn change_for(&self, path: &AttributePath) -> Option<&AttributeChange> {
        self.diffs
            .iter()
            .find(|d| &d.path == path)
            .map(|d| &d.change)
    }

    /// True when anything at or below `path` is set or replaced
    pub fn touches(&self, path: &AttributePath) -> bool {
        self.diffs.iter().any(|d| {
            d.path.starts_with(path)
                && matches!(
                    d.change,
                    AttributeChange::Set(_) | AttributeChange::RequiresReplacement(_)
                )
        })
    }

    pub fn changed(&self) -> impl Iterator<Item = &AttributeDiff> {
        self.diffs
            .iter()
            .filter(|d| d.change != AttributeChange::Unchanged)
    }
}

const SENSITIVE: &str = "(sensitive value)";

impl fmt::Display for ChangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = self.action();
        writeln!(f, "# will be: {}", action)?;

        let show = |value: &Dynamic, sensitive: bool| -> String {
            if sensitive && !value.is_null() && !value.is_unknown() {
                SENSITIVE.to_string()
            } else {
                value.to_string()
            }
        };

        for diff in self.changed() {
            let prior = show(&diff.prior, diff.sensitive);
            match (&diff.change, action) {
                (AttributeChange::Set(value), PlannedAction::Create) => {
                    writeln!(f, "  + {} = {}", diff.path, show(value, diff.sensitive))?
                }
                (AttributeChange::Set(value), _) => writeln!(
                    f,
                    "  ~ {} = {} -> {}",
                    diff.path,
                    prior,
                    show(value, diff.sensitive)
                )?,
                (AttributeChange::ComputedPending, PlannedAction::Create) => {
                    writeln!(f, "  + {} = {}", diff.path, Dynamic::Unknown)?
                }
                (AttributeChange::ComputedPending, _) => writeln!(
                    f,
                    "  ~ {} = {} -> {}",
                    diff.path,
                    prior,
                    Dynamic::Unknown
                )?,
                (AttributeChange::RequiresReplacement(value), _) => writeln!(
                    f,
                    "  -/+ {} = {} -> {} # forces replacement",
                    diff.path,
                    prior,
                    show(value, diff.sensitive)
                )?,
                (AttributeChange::Unchanged, _) => {}
            }
        }
        Ok(())
    }
}

/// Checks desired configuration against the schema, collecting every problem
pub fn validate_config(
    desired: &DynamicValue,
    prior: Option<&ResourceState>,
    schema: &Schema,
) -> Diagnostics {
    let mut diags = Diagnostics::new();
    if !matches!(desired.value, Dynamic::Map(_)) {
        diags.add_error(
            "Configuration must be an object",
            Some(format!("Got {}", desired.value.type_name())),
        );
        return diags;
    }
    let prior = prior.map(|p| &p.attributes.value);
    validate_block(
        &schema.block,
        &desired.value,
        prior,
        &AttributePath::root(),
        &mut diags,
    );
    diags
}

fn error_at(diags: &mut Diagnostics, path: &AttributePath, summary: String, detail: Option<String>) {
    diags.push(Diagnostic::error(summary, detail).with_attribute(path.clone()));
}

fn validate_block(
    block: &Block,
    value: &Dynamic,
    prior: Option<&Dynamic>,
    path: &AttributePath,
    diags: &mut Diagnostics,
) {
    let Some(map) = value.as_map() else {
        error_at(
            diags,
            path,
            format!("{} must be an object", path),
            Some(format!("Got {}", value.type_name())),
        );
        return;
    };

    for key in map.keys() {
        if block.attribute(key).is_none() && block.block_type(key).is_none() {
            error_at(
                diags,
                &path.clone().attribute(key),
                format!("Unsupported argument '{}'", path.clone().attribute(key)),
                Some("An argument with this name is not expected here".to_string()),
            );
        }
    }

    for attr in &block.attributes {
        let attr_path = path.clone().attribute(&attr.name);
        let configured = map.get(&attr.name).unwrap_or(&Dynamic::Null);

        match attr.presence() {
            Some(Presence::Required) if configured.is_null() => error_at(
                diags,
                &attr_path,
                format!("Missing required argument '{}'", attr_path),
                None,
            ),
            Some(Presence::Computed) if !configured.is_null() => {
                let prior_value = prior.and_then(|p| p.get(&attr.name));
                if !prior_value.is_some_and(|p| p.equivalent(configured)) {
                    error_at(
                        diags,
                        &attr_path,
                        format!("Cannot set computed attribute '{}'", attr_path),
                        Some("This value is chosen by the remote side".to_string()),
                    );
                    continue;
                }
            }
            _ => {}
        }

        if !attr.r#type.accepts(configured) {
            error_at(
                diags,
                &attr_path,
                format!("Incorrect type for '{}'", attr_path),
                Some(format!(
                    "Expected {}, got {}",
                    attr.r#type.describe(),
                    configured.type_name()
                )),
            );
            continue;
        }

        if configured.is_null() || !configured.is_wholly_known() {
            continue;
        }
        for validator in &attr.validators {
            validator.validate(configured, &attr_path, diags);
        }
        if attr.deprecated {
            diags.push(
                Diagnostic::warning(
                    format!("Argument '{}' is deprecated", attr_path),
                    None::<String>,
                )
                .with_attribute(attr_path),
            );
        }
    }

    for nested in &block.block_types {
        let block_path = path.clone().attribute(&nested.type_name);
        let configured = map.get(&nested.type_name).unwrap_or(&Dynamic::Null);
        let prior_value = prior.and_then(|p| p.get(&nested.type_name));

        if configured.is_unknown() {
            continue;
        }

        let elements: Vec<&Dynamic> = match (nested.nesting, configured) {
            (_, Dynamic::Null) => Vec::new(),
            (NestingMode::Single, element) => vec![element],
            (NestingMode::List | NestingMode::Set, Dynamic::List(items)) => items.iter().collect(),
            (_, other) => {
                error_at(
                    diags,
                    &block_path,
                    format!("{} must be a list of blocks", block_path),
                    Some(format!("Got {}", other.type_name())),
                );
                continue;
            }
        };

        if elements.len() < nested.min_items {
            error_at(
                diags,
                &block_path,
                format!("Insufficient {} blocks", block_path),
                Some(format!(
                    "At least {} required, got {}",
                    nested.min_items,
                    elements.len()
                )),
            );
        }
        if nested.max_items > 0 && elements.len() > nested.max_items {
            error_at(
                diags,
                &block_path,
                format!("Too many {} blocks", block_path),
                Some(format!(
                    "No more than {} allowed, got {}",
                    nested.max_items,
                    elements.len()
                )),
            );
            continue;
        }

        for (i, element) in elements.into_iter().enumerate() {
            let (element_path, element_prior) = match nested.nesting {
                NestingMode::Single => (block_path.clone(), prior_value),
                NestingMode::List | NestingMode::Set => (
                    block_path.clone().index(i as i64),
                    prior_value.and_then(Dynamic::as_list).and_then(|l| l.get(i)),
                ),
            };
            validate_block(&nested.block, element, element_prior, &element_path, diags);
        }
    }
}

/// Validates then plans `desired` against `prior`
pub fn compute_change_set(
    desired: &DynamicValue,
    prior: Option<&ResourceState>,
    schema: &Schema,
) -> Result<ChangeSet> {
    validate_config(desired, prior, schema).into_result()?;
    plan_validated(desired, prior, schema)
}

/// One attribute occurrence in the planned tree
struct Site<'a> {
    path: AttributePath,
    attr: &'a Attribute,
    config: Dynamic,
    /// None when the enclosing object has no prior value
    prior: Option<Dynamic>,
}

impl Site<'_> {
    fn prior_or_null(&self) -> Dynamic {
        self.prior.clone().unwrap_or(Dynamic::Null)
    }

    fn is_deferred(&self) -> bool {
        self.attr
            .plan_modifiers
            .iter()
            .any(|m| m.depends_on().is_some())
    }
}

struct Planner<'a> {
    sites: Vec<Site<'a>>,
    /// Prior attributes of block elements no longer configured
    removed: Vec<Site<'a>>,
    shape_changed: bool,
    has_prior: bool,
}

impl<'a> Planner<'a> {
    fn plan_block(
        &mut self,
        block: &'a Block,
        config: &Dynamic,
        prior: Option<&Dynamic>,
        path: &AttributePath,
    ) -> Dynamic {
        let mut planned = BTreeMap::new();

        for attr in &block.attributes {
            let attr_path = path.clone().attribute(&attr.name);
            let configured = config.get(&attr.name).cloned().unwrap_or(Dynamic::Null);
            let prior_value = prior.map(|p| p.get(&attr.name).cloned().unwrap_or(Dynamic::Null));

            let value = if !configured.is_null() {
                configured.clone()
            } else if let Some(default) = &attr.default {
                default
                    .default_value(DefaultRequest {
                        path: attr_path.clone(),
                    })
                    .value
            } else {
                match attr.presence() {
                    Some(Presence::OptionalComputed | Presence::Computed) => {
                        prior_value.clone().unwrap_or(Dynamic::Unknown)
                    }
                    _ => Dynamic::Null,
                }
            };

            planned.insert(attr.name.clone(), value);
            self.sites.push(Site {
                path: attr_path,
                attr,
                config: configured,
                prior: prior_value,
            });
        }

        for nested in &block.block_types {
            let block_path = path.clone().attribute(&nested.type_name);
            let configured = config.get(&nested.type_name).unwrap_or(&Dynamic::Null);
            let prior_value = prior
                .and_then(|p| p.get(&nested.type_name))
                .filter(|p| !p.is_null());

            let value = match (nested.nesting, configured) {
                (_, Dynamic::Unknown) => Dynamic::Unknown,
                (NestingMode::Single, Dynamic::Null) => {
                    if let Some(gone) = prior_value {
                        self.shape_changed = true;
                        self.record_removed(&nested.block, gone, &block_path);
                    }
                    Dynamic::Null
                }
                (NestingMode::Single, element) => {
                    if self.has_prior && prior_value.is_none() {
                        self.shape_changed = true;
                    }
                    self.plan_block(&nested.block, element, prior_value, &block_path)
                }
                (NestingMode::List | NestingMode::Set, elements) => {
                    let elements = elements.as_list().map(Vec::as_slice).unwrap_or(&[]);
                    let prior_elements = prior_value
                        .and_then(Dynamic::as_list)
                        .map(Vec::as_slice)
                        .unwrap_or(&[]);
                    if self.has_prior && elements.len() != prior_elements.len() {
                        self.shape_changed = true;
                    }

                    let mut planned_elements = Vec::with_capacity(elements.len());
                    for (i, element) in elements.iter().enumerate() {
                        planned_elements.push(self.plan_block(
                            &nested.block,
                            element,
                            prior_elements.get(i),
                            &block_path.clone().index(i as i64),
                        ));
                    }
                    for (i, gone) in prior_elements.iter().enumerate().skip(elements.len()) {
                        self.record_removed(&nested.block, gone, &block_path.clone().index(i as i64));
                    }
                    Dynamic::List(planned_elements)
                }
            };
            planned.insert(nested.type_name.clone(), value);
        }

        Dynamic::Map(planned)
    }

    fn record_removed(&mut self, block: &'a Block, prior: &Dynamic, path: &AttributePath) {
        for attr in &block.attributes {
            let value = prior.get(&attr.name).cloned().unwrap_or(Dynamic::Null);
            if value.is_null() {
                continue;
            }
            self.removed.push(Site {
                path: path.clone().attribute(&attr.name),
                attr,
                config: Dynamic::Null,
                prior: Some(value),
            });
        }
        for nested in &block.block_types {
            let block_path = path.clone().attribute(&nested.type_name);
            match prior.get(&nested.type_name) {
                Some(Dynamic::List(items)) => {
                    for (i, item) in items.iter().enumerate() {
                        self.record_removed(&nested.block, item, &block_path.clone().index(i as i64));
                    }
                }
                Some(item @ Dynamic::Map(_)) => self.record_removed(&nested.block, item, &block_path),
                _ => {}
            }
        }
    }
}

fn run_modifiers(
    site: &Site<'_>,
    planned: &mut DynamicValue,
    replace_paths: &mut Vec<AttributePath>,
    diags: &mut Diagnostics,
) -> Result<()> {
    for modifier in &site.attr.plan_modifiers {
        let current = planned.get(&site.path).cloned().unwrap_or(Dynamic::Null);
        let response = modifier.modify_plan(PlanModifyRequest {
            attribute_path: site.path.clone(),
            state: site.prior_or_null(),
            plan: current,
            config: site.config.clone(),
            planned_object: &*planned,
        });

        diags.extend(response.diagnostics);
        if response.requires_replace && !replace_paths.contains(&site.path) {
            replace_paths.push(site.path.clone());
        }
        planned.set_value(&site.path, response.plan_value)?;
    }
    Ok(())
}

/// Orders sibling-dependent sites so every dependency is planned first
fn dependency_order(sites: &[Site<'_>], deferred: &[usize]) -> Result<Vec<usize>> {
    let position: HashMap<&AttributePath, usize> = deferred
        .iter()
        .enumerate()
        .map(|(pos, &idx)| (&sites[idx].path, pos))
        .collect();

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); deferred.len()];
    let mut pending = vec![0usize; deferred.len()];

    for (pos, &idx) in deferred.iter().enumerate() {
        let site = &sites[idx];
        let base = site.path.parent().unwrap_or_default();
        for relative in site.attr.plan_modifiers.iter().filter_map(|m| m.depends_on()) {
            let mut target = base.clone();
            target.steps.extend(relative.steps);
            for (candidate, &dep_pos) in &position {
                if target.starts_with(candidate) || candidate.starts_with(&target) {
                    dependents[dep_pos].push(pos);
                    pending[pos] += 1;
                }
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..deferred.len()).filter(|&p| pending[p] == 0).collect();
    let mut order = Vec::with_capacity(deferred.len());
    while let Some(pos) = ready.pop_front() {
        order.push(deferred[pos]);
        for &next in &dependents[pos] {
            pending[next] -= 1;
            if pending[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if order.len() != deferred.len() {
        let mut cycle: Vec<String> = (0..deferred.len())
            .filter(|&p| pending[p] > 0)
            .map(|p| sites[deferred[p]].path.to_string())
            .collect();
        cycle.sort();
        return Err(ConvergeError::Schema(format!(
            "sibling-dependent defaults form a cycle: {}",
            cycle.join(", ")
        )));
    }
    Ok(order)
}

/// True when a sibling this site derives its default from is planned
/// differently from its prior value, so the prior default is stale
fn sibling_changed(site: &Site<'_>, planned: &DynamicValue, prior: Option<&ResourceState>) -> bool {
    let Some(prior) = prior else {
        return false;
    };
    if site.prior.is_none() {
        return false;
    }
    let base = site.path.parent().unwrap_or_default();
    site.attr
        .plan_modifiers
        .iter()
        .filter_map(|m| m.depends_on())
        .any(|relative| {
            let mut sibling = base.clone();
            sibling.steps.extend(relative.steps);
            let after = planned.get(&sibling).unwrap_or(&Dynamic::Null);
            let before = prior.attributes.get(&sibling).unwrap_or(&Dynamic::Null);
            !after.is_wholly_known() || !before.equivalent(after)
        })
}

/// Plans configuration that has already passed [`validate_config`]
pub fn plan_validated(
    desired: &DynamicValue,
    prior: Option<&ResourceState>,
    schema: &Schema,
) -> Result<ChangeSet> {
    let prior_value = prior.map(|p| &p.attributes.value);
    let mut planner = Planner {
        sites: Vec::new(),
        removed: Vec::new(),
        shape_changed: false,
        has_prior: prior.is_some(),
    };
    let mut planned = DynamicValue::new(planner.plan_block(
        &schema.block,
        &desired.value,
        prior_value,
        &AttributePath::root(),
    ));

    let has_changes = !planner.has_prior
        || planner.shape_changed
        || planner.sites.iter().any(|site| {
            !site.attr.is_computed_only()
                && match (&site.prior, planned.get(&site.path)) {
                    (Some(before), Some(after)) => {
                        !after.is_wholly_known() || !before.equivalent(after)
                    }
                    _ => true,
                }
        });

    if has_changes && planner.has_prior {
        for site in &planner.sites {
            if site.attr.is_computed_only() && site.config.is_null() {
                planned.mark_unknown(&site.path)?;
            }
        }
    }

    let mut diags = Diagnostics::new();
    let mut replace_paths = Vec::new();

    let mut deferred = Vec::new();
    for (idx, site) in planner.sites.iter().enumerate() {
        if site.is_deferred() {
            deferred.push(idx);
        } else {
            run_modifiers(site, &mut planned, &mut replace_paths, &mut diags)?;
        }
    }
    for idx in dependency_order(&planner.sites, &deferred)? {
        let site = &planner.sites[idx];
        if site.config.is_null() && sibling_changed(site, &planned, prior) {
            planned.mark_unknown(&site.path)?;
        }
        run_modifiers(site, &mut planned, &mut replace_paths, &mut diags)?;
    }

    let diags = diags.into_result()?;

    // Replacement only means something for an object that already exists
    if !planner.has_prior {
        replace_paths.clear();
    }

    let mut diffs = Vec::with_capacity(planner.sites.len() + planner.removed.len());
    for site in &planner.sites {
        let after = planned.get(&site.path).cloned().unwrap_or(Dynamic::Null);
        let before = site.prior_or_null();
        let change = if !after.is_wholly_known() {
            AttributeChange::ComputedPending
        } else if !planner.has_prior {
            if after.is_null() {
                AttributeChange::Unchanged
            } else {
                AttributeChange::Set(after)
            }
        } else if before.equivalent(&after) {
            AttributeChange::Unchanged
        } else if site.attr.requires_replace || replace_paths.contains(&site.path) {
            AttributeChange::RequiresReplacement(after)
        } else {
            AttributeChange::Set(after)
        };

        if matches!(change, AttributeChange::RequiresReplacement(_))
            && !replace_paths.contains(&site.path)
        {
            replace_paths.push(site.path.clone());
        }

        diffs.push(AttributeDiff {
            path: site.path.clone(),
            change,
            prior: before,
            sensitive: site.attr.sensitive,
        });
    }

    for site in &planner.removed {
        let change = if site.attr.requires_replace {
            replace_paths.push(site.path.clone());
            AttributeChange::RequiresReplacement(Dynamic::Null)
        } else {
            AttributeChange::Set(Dynamic::Null)
        };
        diffs.push(AttributeDiff {
            path: site.path.clone(),
            change,
            prior: site.prior_or_null(),
            sensitive: site.attr.sensitive,
        });
    }

    replace_paths.sort();
    Ok(ChangeSet {
        prior_identity: prior.map(|p| p.identity.clone()),
        config: desired.clone(),
        planned_state: planned,
        requires_replacement: !replace_paths.is_empty(),
        replace_paths,
        diffs,
        warnings: diags.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::defaults::StaticDefault;
    use crate::plan_modifier::{DefaultFromSibling, UseStateForUnknown};
    use crate::schema::{AttributeBuilder, AttributeType, BlockBuilder, NestedBlock, SchemaBuilder};
    use crate::validator::StringLengthValidator;

    fn schema() -> Schema {
        SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("name", AttributeType::String)
                    .required()
                    .requires_replace()
                    .validator(StringLengthValidator::between(1, 10))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("size", AttributeType::Int)
                    .optional()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("token", AttributeType::String)
                    .optional()
                    .sensitive()
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("force", AttributeType::Bool)
                    .optional()
                    .computed()
                    .default(StaticDefault::bool(false))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("id", AttributeType::String)
                    .computed()
                    .plan_modifier(UseStateForUnknown::create())
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("etag", AttributeType::String)
                    .computed()
                    .build(),
            )
            .block(
                NestedBlock::list(
                    "zone",
                    BlockBuilder::new()
                        .attribute(
                            AttributeBuilder::new("name", AttributeType::String)
                                .required()
                                .build(),
                        )
                        .build(),
                )
                .max_items(2),
            )
            .build()
    }

    fn object(pairs: &[(&str, Dynamic)]) -> Dynamic {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn desired(pairs: &[(&str, Dynamic)]) -> DynamicValue {
        DynamicValue::new(object(pairs))
    }

    fn prior_state() -> ResourceState {
        ResourceState::new(
            "test_thing",
            "thing-1",
            0,
            desired(&[
                ("name", "alpha".into()),
                ("size", Dynamic::Int(1)),
                ("token", Dynamic::Null),
                ("force", false.into()),
                ("id", "thing-1".into()),
                ("etag", "e1".into()),
                ("zone", Dynamic::List(vec![object(&[("name", "z1".into())])])),
            ]),
        )
        .unwrap()
    }

    #[test]
    fn create_sets_configured_and_defers_computed() {
        let change_set =
            compute_change_set(&desired(&[("name", "alpha".into())]), None, &schema()).unwrap();

        assert_eq!(change_set.action(), PlannedAction::Create);
        assert_eq!(
            change_set.change_for(&AttributePath::new("name")),
            Some(&AttributeChange::Set("alpha".into()))
        );
        assert_eq!(
            change_set.change_for(&AttributePath::new("force")),
            Some(&AttributeChange::Set(false.into()))
        );
        assert_eq!(
            change_set.change_for(&AttributePath::new("id")),
            Some(&AttributeChange::ComputedPending)
        );
        assert_eq!(
            change_set.change_for(&AttributePath::new("size")),
            Some(&AttributeChange::Unchanged)
        );
    }

    #[test]
    fn state_diffed_against_itself_is_unchanged() {
        let prior = prior_state();
        let change_set = compute_change_set(&prior.attributes, Some(&prior), &schema()).unwrap();

        assert_eq!(change_set.action(), PlannedAction::NoOp);
        assert!(change_set
            .diffs
            .iter()
            .all(|d| d.change == AttributeChange::Unchanged));
        assert_eq!(change_set.planned_state, prior.attributes);
    }

    #[test]
    fn computed_only_goes_pending_unless_state_is_kept() {
        let prior = prior_state();
        let config = desired(&[
            ("name", "alpha".into()),
            ("size", Dynamic::Int(2)),
            ("zone", Dynamic::List(vec![object(&[("name", "z1".into())])])),
        ]);
        let change_set = compute_change_set(&config, Some(&prior), &schema()).unwrap();

        assert_eq!(change_set.action(), PlannedAction::Update);
        assert_eq!(
            change_set.change_for(&AttributePath::new("size")),
            Some(&AttributeChange::Set(Dynamic::Int(2)))
        );
        assert_eq!(
            change_set.change_for(&AttributePath::new("id")),
            Some(&AttributeChange::Unchanged)
        );
        assert_eq!(
            change_set.change_for(&AttributePath::new("etag")),
            Some(&AttributeChange::ComputedPending)
        );
    }

    #[test]
    fn replacement_attribute_forces_whole_object() {
        let prior = prior_state();
        let config = desired(&[
            ("name", "beta".into()),
            ("size", Dynamic::Int(5)),
            ("zone", Dynamic::List(vec![object(&[("name", "z1".into())])])),
        ]);
        let change_set = compute_change_set(&config, Some(&prior), &schema()).unwrap();

        assert_eq!(change_set.action(), PlannedAction::Replace);
        assert!(change_set.requires_replacement);
        assert_eq!(change_set.replace_paths, vec![AttributePath::new("name")]);
        assert_eq!(
            change_set.change_for(&AttributePath::new("size")),
            Some(&AttributeChange::Set(Dynamic::Int(5)))
        );
    }

    #[test]
    fn validation_reports_every_problem_at_once() {
        let config = desired(&[
            ("name", "far-too-long-a-name".into()),
            ("size", "big".into()),
            ("etag", "mine".into()),
            ("bogus", true.into()),
            (
                "zone",
                Dynamic::List(vec![
                    object(&[("name", "a".into())]),
                    object(&[("name", "b".into())]),
                    object(&[("name", "c".into())]),
                ]),
            ),
        ]);

        let err = compute_change_set(&config, None, &schema()).unwrap_err();
        let ConvergeError::Validation(diags) = err else {
            panic!("expected validation error, got {err:?}");
        };
        let summaries: Vec<_> = diags.errors.iter().map(|d| d.summary.clone()).collect();
        assert_eq!(diags.errors.len(), 5, "{summaries:?}");
        assert!(summaries.iter().any(|s| s.contains("maximum length")));
        assert!(summaries.iter().any(|s| s.contains("Incorrect type for 'size'")));
        assert!(summaries.iter().any(|s| s.contains("Cannot set computed")));
        assert!(summaries.iter().any(|s| s.contains("Unsupported argument 'bogus'")));
        assert!(summaries.iter().any(|s| s.contains("Too many zone blocks")));
    }

    #[test]
    fn missing_required_nested_attribute_has_full_path() {
        let config = desired(&[
            ("name", "alpha".into()),
            ("zone", Dynamic::List(vec![Dynamic::object()])),
        ]);
        let diags = validate_config(&config, None, &schema());

        assert_eq!(diags.errors.len(), 1);
        assert_eq!(
            diags.errors[0].attribute,
            Some(AttributePath::new("zone").index(0).attribute("name"))
        );
    }

    #[test]
    fn removed_block_element_is_a_change() {
        let prior = prior_state();
        let config = desired(&[("name", "alpha".into()), ("size", Dynamic::Int(1))]);
        let change_set = compute_change_set(&config, Some(&prior), &schema()).unwrap();

        assert_eq!(change_set.action(), PlannedAction::Update);
        assert_eq!(
            change_set.change_for(&AttributePath::new("zone").index(0).attribute("name")),
            Some(&AttributeChange::Set(Dynamic::Null))
        );
    }

    #[test]
    fn sensitive_values_are_masked_when_rendered() {
        let config = desired(&[("name", "alpha".into()), ("token", "hunter2".into())]);
        let rendered = compute_change_set(&config, None, &schema())
            .unwrap()
            .to_string();

        assert!(rendered.contains("+ token = (sensitive value)"));
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("+ id = (known after apply)"));
    }

    fn sibling_schema() -> Schema {
        SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("mode", AttributeType::String)
                    .optional()
                    .computed()
                    .requires_replace()
                    .plan_modifier(DefaultFromSibling::create(
                        AttributePath::new("kind"),
                        |kind| match kind.as_string() {
                            Some("zone") => Dynamic::from("single-zone"),
                            _ => Dynamic::from("regional"),
                        },
                    ))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("kind", AttributeType::String)
                    .optional()
                    .computed()
                    .build(),
            )
            .build()
    }

    #[test]
    fn sibling_default_pending_until_sibling_known() {
        let change_set = compute_change_set(&desired(&[]), None, &sibling_schema()).unwrap();
        assert_eq!(
            change_set.change_for(&AttributePath::new("mode")),
            Some(&AttributeChange::ComputedPending)
        );

        let change_set =
            compute_change_set(&desired(&[("kind", "zone".into())]), None, &sibling_schema())
                .unwrap();
        assert_eq!(
            change_set.change_for(&AttributePath::new("mode")),
            Some(&AttributeChange::Set("single-zone".into()))
        );
    }

    #[test]
    fn sibling_default_cycle_is_a_schema_error() {
        let schema = SchemaBuilder::new()
            .attribute(
                AttributeBuilder::new("a", AttributeType::String)
                    .optional()
                    .computed()
                    .plan_modifier(DefaultFromSibling::create(AttributePath::new("b"), |v| {
                        v.clone()
                    }))
                    .build(),
            )
            .attribute(
                AttributeBuilder::new("b", AttributeType::String)
                    .optional()
                    .computed()
                    .plan_modifier(DefaultFromSibling::create(AttributePath::new("a"), |v| {
                        v.clone()
                    }))
                    .build(),
            )
            .build();

        let err = compute_change_set(&desired(&[]), None, &schema).unwrap_err();
        assert!(matches!(err, ConvergeError::Schema(ref m) if m.contains("a, b")));
    }
}
