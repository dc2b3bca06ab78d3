use crate::types::{AttributePath, Diagnostics, Dynamic, DynamicValue};

#[derive(Debug, Clone)]
pub struct PlanModifyRequest<'a> {
    pub attribute_path: AttributePath,
    /// Value in the prior state, null on create
    pub state: Dynamic,
    /// Value planned so far
    pub plan: Dynamic,
    /// Value as written in configuration
    pub config: Dynamic,
    /// The whole planned object, for modifiers that look at siblings
    pub planned_object: &'a DynamicValue,
}

#[derive(Debug, Clone)]
pub struct PlanModifyResponse {
    pub plan_value: Dynamic,
    pub requires_replace: bool,
    pub diagnostics: Diagnostics,
}

impl PlanModifyResponse {
    fn keep(plan_value: Dynamic) -> Self {
        Self {
            plan_value,
            requires_replace: false,
            diagnostics: Diagnostics::new(),
        }
    }
}

/// Trait for adjusting an attribute's planned value
///
/// Plan modifiers run in declaration order after the attribute has been
/// planned and can:
/// - Modify the planned value
/// - Mark the object as requiring replacement
/// - Add warnings or errors to the plan
pub trait PlanModifier: Send + Sync {
    fn modify_plan(&self, request: PlanModifyRequest<'_>) -> PlanModifyResponse;

    /// Path, relative to the enclosing object, of a sibling this modifier reads.
    /// Attributes carrying such a modifier are planned after everything else,
    /// in dependency order.
    fn depends_on(&self) -> Option<AttributePath> {
        None
    }
}

/// Keeps the prior state value when the planned value is unknown
///
/// Useful for computed attributes that never change after creation, such
/// as identifiers and ARNs.
pub struct UseStateForUnknown;

impl UseStateForUnknown {
    pub fn create() -> Box<dyn PlanModifier> {
        Box::new(Self)
    }
}

impl PlanModifier for UseStateForUnknown {
    fn modify_plan(&self, request: PlanModifyRequest<'_>) -> PlanModifyResponse {
        let plan_value = match (&request.plan, &request.state) {
            (Dynamic::Unknown, Dynamic::Null) => request.plan,
            (Dynamic::Unknown, state) => state.clone(),
            _ => request.plan,
        };
        PlanModifyResponse::keep(plan_value)
    }
}

pub struct RequiresReplaceIf<F>
where
    F: Fn(&PlanModifyRequest<'_>) -> bool + Send + Sync,
{
    predicate: F,
    description: String,
}

impl<F> RequiresReplaceIf<F>
where
    F: Fn(&PlanModifyRequest<'_>) -> bool + Send + Sync,
{
    pub fn new(predicate: F, description: impl Into<String>) -> Self {
        Self {
            predicate,
            description: description.into(),
        }
    }
}

impl<F> PlanModifier for RequiresReplaceIf<F>
where
    F: Fn(&PlanModifyRequest<'_>) -> bool + Send + Sync,
{
    fn modify_plan(&self, request: PlanModifyRequest<'_>) -> PlanModifyResponse {
        let mut diagnostics = Diagnostics::new();
        let requires_replace = (self.predicate)(&request);

        if requires_replace {
            diagnostics.add_warning(
                format!(
                    "Attribute '{}' requires resource replacement",
                    request.attribute_path
                ),
                Some(&self.description),
            );
        }

        PlanModifyResponse {
            plan_value: request.plan,
            requires_replace,
            diagnostics,
        }
    }
}

/// Derives a default from another attribute's planned value
///
/// Applies only while the attribute's own planned value is unknown. When the
/// sibling is itself still unknown the attribute stays pending.
pub struct DefaultFromSibling<F>
where
    F: Fn(&Dynamic) -> Dynamic + Send + Sync,
{
    sibling: AttributePath,
    derive: F,
}

impl<F> DefaultFromSibling<F>
where
    F: Fn(&Dynamic) -> Dynamic + Send + Sync + 'static,
{
    pub fn create(sibling: AttributePath, derive: F) -> Box<dyn PlanModifier> {
        Box::new(Self { sibling, derive })
    }
}

impl<F> PlanModifier for DefaultFromSibling<F>
where
    F: Fn(&Dynamic) -> Dynamic + Send + Sync,
{
    fn modify_plan(&self, request: PlanModifyRequest<'_>) -> PlanModifyResponse {
        if !request.plan.is_unknown() {
            return PlanModifyResponse::keep(request.plan);
        }

        let mut sibling_path = request.attribute_path.parent().unwrap_or_default();
        sibling_path.steps.extend(self.sibling.steps.iter().cloned());

        let sibling = request
            .planned_object
            .get(&sibling_path)
            .cloned()
            .unwrap_or(Dynamic::Null);

        if !sibling.is_wholly_known() {
            return PlanModifyResponse::keep(Dynamic::Unknown);
        }
        PlanModifyResponse::keep((self.derive)(&sibling))
    }

    fn depends_on(&self) -> Option<AttributePath> {
        Some(self.sibling.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(
        state: Dynamic,
        plan: Dynamic,
        config: Dynamic,
        planned_object: &'a DynamicValue,
    ) -> PlanModifyRequest<'a> {
        PlanModifyRequest {
            attribute_path: AttributePath::new("field"),
            state,
            plan,
            config,
            planned_object,
        }
    }

    #[test]
    fn use_state_for_unknown_preserves_state_when_unknown() {
        let object = DynamicValue::object();
        let response = UseStateForUnknown.modify_plan(request(
            Dynamic::from("existing-value"),
            Dynamic::Unknown,
            Dynamic::Null,
            &object,
        ));

        assert_eq!(response.plan_value, Dynamic::from("existing-value"));
        assert!(!response.requires_replace);
    }

    #[test]
    fn use_state_for_unknown_uses_plan_when_known() {
        let object = DynamicValue::object();
        let response = UseStateForUnknown.modify_plan(request(
            Dynamic::from("existing-value"),
            Dynamic::from("new-value"),
            Dynamic::from("new-value"),
            &object,
        ));

        assert_eq!(response.plan_value, Dynamic::from("new-value"));
    }

    #[test]
    fn use_state_for_unknown_stays_unknown_on_create() {
        let object = DynamicValue::object();
        let response = UseStateForUnknown.modify_plan(request(
            Dynamic::Null,
            Dynamic::Unknown,
            Dynamic::Null,
            &object,
        ));

        assert!(response.plan_value.is_unknown());
    }

    #[test]
    fn requires_replace_if_triggers_on_condition() {
        let modifier = RequiresReplaceIf::new(
            |req| {
                matches!((&req.state, &req.plan),
                    (Dynamic::String(old), Dynamic::String(new)) if !old.is_empty() && new.is_empty()
                )
            },
            "Cannot change to empty string without replacement",
        );
        let object = DynamicValue::object();

        let response = modifier.modify_plan(request(
            Dynamic::from("has-value"),
            Dynamic::from(""),
            Dynamic::from(""),
            &object,
        ));
        assert!(response.requires_replace);
        assert_eq!(response.diagnostics.warnings.len(), 1);

        let response = modifier.modify_plan(request(
            Dynamic::from(""),
            Dynamic::from("new-value"),
            Dynamic::from("new-value"),
            &object,
        ));
        assert!(!response.requires_replace);
        assert_eq!(response.diagnostics.warnings.len(), 0);
    }

    #[test]
    fn default_from_sibling_waits_for_unknown_sibling() {
        let modifier = DefaultFromSibling::create(AttributePath::new("kind"), |kind| {
            match kind.as_string() {
                Some("zone") => Dynamic::from("single-zone"),
                _ => Dynamic::from("regional"),
            }
        });
        assert_eq!(modifier.depends_on(), Some(AttributePath::new("kind")));

        let mut object = DynamicValue::object();
        object
            .set_value(&AttributePath::new("kind"), Dynamic::Unknown)
            .unwrap();
        let response = modifier.modify_plan(request(
            Dynamic::Null,
            Dynamic::Unknown,
            Dynamic::Null,
            &object,
        ));
        assert!(response.plan_value.is_unknown());

        object.set_string(&AttributePath::new("kind"), "zone").unwrap();
        let response = modifier.modify_plan(request(
            Dynamic::Null,
            Dynamic::Unknown,
            Dynamic::Null,
            &object,
        ));
        assert_eq!(response.plan_value, Dynamic::from("single-zone"));
    }

    #[test]
    fn default_from_sibling_leaves_known_values_alone() {
        let modifier =
            DefaultFromSibling::create(AttributePath::new("kind"), |_| Dynamic::from("derived"));
        let object = DynamicValue::object();

        let response = modifier.modify_plan(request(
            Dynamic::Null,
            Dynamic::from("configured"),
            Dynamic::from("configured"),
            &object,
        ));
        assert_eq!(response.plan_value, Dynamic::from("configured"));
    }
}
