//! Declarative validation rules for component data.
//!
//! A [`ComponentSchema`] lists [`FieldDef`]s. Validation is non-destructive
//! and collects one human-readable reason per violation instead of stopping
//! at the first one:
//!
//! ```
//! use bastion_ecs::schema::{ComponentSchema, FieldDef};
//! use bastion_ecs::value::{ComponentData, Value, ValueKind};
//!
//! let schema = ComponentSchema::new("Health")
//!     .with_field(FieldDef::required("value", ValueKind::Float).with_range(0.0, 1000.0));
//!
//! let mut data = ComponentData::new();
//! data.insert("value".into(), Value::Int(50));
//! assert!(schema.validate(&data).is_ok());
//!
//! data.insert("value".into(), Value::Int(5000));
//! let reasons = schema.validate(&data).unwrap_err();
//! assert_eq!(reasons.len(), 1);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::entity::INVALID_REFERENCE;
use crate::value::{ComponentData, Value, ValueKind};

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// Result of a custom field predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateOutcome {
    Pass,
    /// Failed, optionally with a descriptive reason.
    Fail(Option<String>),
}

impl From<bool> for PredicateOutcome {
    fn from(ok: bool) -> Self {
        if ok {
            PredicateOutcome::Pass
        } else {
            PredicateOutcome::Fail(None)
        }
    }
}

impl From<Result<(), String>> for PredicateOutcome {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => PredicateOutcome::Pass,
            Err(reason) => PredicateOutcome::Fail(Some(reason)),
        }
    }
}

/// A custom check run against a field value of the right kind.
pub type Predicate = Arc<dyn Fn(&Value) -> PredicateOutcome + Send + Sync>;

// ---------------------------------------------------------------------------
// FieldDef
// ---------------------------------------------------------------------------

/// Whether a field holds entity references.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReferenceRole {
    #[default]
    None,
    /// A single entity id.
    Single,
    /// A list of entity ids.
    Many,
}

/// Rules for one field of a component.
#[derive(Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: ValueKind,
    pub required: bool,
    pub default: Option<Value>,
    /// Inclusive numeric bounds.
    pub range: Option<(f64, f64)>,
    pub allowed: Option<Vec<Value>>,
    pub description: String,
    pub reference: ReferenceRole,
    predicate: Option<Predicate>,
}

impl fmt::Debug for FieldDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("required", &self.required)
            .field("default", &self.default)
            .field("range", &self.range)
            .field("allowed", &self.allowed)
            .field("reference", &self.reference)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

impl FieldDef {
    fn base(name: &str, kind: ValueKind) -> Self {
        Self {
            name: name.to_owned(),
            kind,
            required: false,
            default: None,
            range: None,
            allowed: None,
            description: String::new(),
            reference: ReferenceRole::None,
            predicate: None,
        }
    }

    /// A field that must be present.
    pub fn required(name: &str, kind: ValueKind) -> Self {
        Self {
            required: true,
            ..Self::base(name, kind)
        }
    }

    /// An optional field filled with `default` when absent.
    pub fn optional(name: &str, kind: ValueKind, default: impl Into<Value>) -> Self {
        Self {
            default: Some(default.into()),
            ..Self::base(name, kind)
        }
    }

    /// An optional field with no default.
    pub fn optional_nil(name: &str, kind: ValueKind) -> Self {
        Self::base(name, kind)
    }

    /// A field holding one entity id, defaulting to the invalid sentinel.
    pub fn entity_ref(name: &str) -> Self {
        Self {
            default: Some(Value::Int(INVALID_REFERENCE)),
            reference: ReferenceRole::Single,
            ..Self::base(name, ValueKind::Int)
        }
    }

    /// A field holding a list of entity ids, defaulting to an empty list.
    pub fn entity_refs(name: &str) -> Self {
        Self {
            default: Some(Value::List(Vec::new())),
            reference: ReferenceRole::Many,
            ..Self::base(name, ValueKind::List)
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn one_of(mut self, allowed: impl IntoIterator<Item = Value>) -> Self {
        self.allowed = Some(allowed.into_iter().collect());
        self
    }

    /// Attach a custom predicate. It may return `bool` or `Result<(), String>`.
    pub fn with_predicate<F, R>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> R + Send + Sync + 'static,
        R: Into<PredicateOutcome>,
    {
        self.predicate = Some(Arc::new(move |v: &Value| predicate(v).into()));
        self
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_owned();
        self
    }

    /// Check a present, non-null value against this field's rules.
    fn check(&self, schema: &str, value: &Value, errors: &mut Vec<String>) {
        let at = format!("{schema}.{}", self.name);

        if !value.matches_kind(self.kind) {
            errors.push(format!("{at}: expected {}, found {}", self.kind, value.kind()));
            return;
        }

        if let (Some((min, max)), Some(n)) = (self.range, value.as_float()) {
            if !(min..=max).contains(&n) {
                errors.push(format!("{at}: value {n} outside range [{min}, {max}]"));
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| loosely_equal(a, value)) {
                errors.push(format!(
                    "{at}: value {} is not one of {}",
                    value.to_json(),
                    serde_json::Value::Array(allowed.iter().map(Value::to_json).collect())
                ));
            }
        }

        if self.reference == ReferenceRole::Many {
            if let Some(items) = value.as_list() {
                for (i, item) in items.iter().enumerate() {
                    if item.as_int().is_none() {
                        errors.push(format!("{at}[{i}]: expected entity id, found {}", item.kind()));
                    }
                }
            }
        }

        if let Some(predicate) = &self.predicate {
            match predicate(value) {
                PredicateOutcome::Pass => {}
                PredicateOutcome::Fail(Some(reason)) => errors.push(format!("{at}: {reason}")),
                PredicateOutcome::Fail(None) => errors.push(format!("{at}: custom check failed")),
            }
        }
    }
}

/// Equality that treats `Int(2)` and `Float(2.0)` as the same value.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_float(), b.as_float()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

// ---------------------------------------------------------------------------
// ComponentSchema
// ---------------------------------------------------------------------------

/// The field rules for one component type.
#[derive(Debug, Clone)]
pub struct ComponentSchema {
    name: String,
    fields: Vec<FieldDef>,
}

impl ComponentSchema {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            fields: Vec::new(),
        }
    }

    /// Add a field. A later field with the same name replaces the earlier one.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.retain(|f| f.name != field.name);
        self.fields.push(field);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Fields explicitly declared as entity references.
    pub fn reference_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields
            .iter()
            .filter(|f| f.reference != ReferenceRole::None)
    }

    pub fn declares_references(&self) -> bool {
        self.reference_fields().next().is_some()
    }

    /// Validate `data`, returning every violation found.
    ///
    /// Fields not named by the schema are ignored. A `null` value counts as
    /// absent.
    pub fn validate(&self, data: &ComponentData) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        for field in &self.fields {
            match data.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(format!("{}.{}: required field is missing", self.name, field.name));
                    }
                }
                Some(value) => field.check(&self.name, value, &mut errors),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Copy of `data` with absent defaulted fields filled in.
    ///
    /// Required fields without a value stay absent.
    pub fn apply_defaults(&self, data: &ComponentData) -> ComponentData {
        let mut out = data.clone();
        for field in &self.fields {
            if let Some(default) = &field.default {
                if !out.contains_key(&field.name) {
                    out.insert(field.name.clone(), default.clone());
                }
            }
        }
        out
    }

    /// Data consisting only of the declared defaults.
    pub fn default_data(&self) -> ComponentData {
        self.apply_defaults(&ComponentData::new())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::data_from_json;
    use serde_json::json;

    fn unit_schema() -> ComponentSchema {
        ComponentSchema::new("Unit")
            .with_field(FieldDef::required("hp", ValueKind::Float).with_range(0.0, 1000.0))
            .with_field(
                FieldDef::optional("stance", ValueKind::String, "idle").one_of([
                    Value::from("idle"),
                    Value::from("attack"),
                    Value::from("hold"),
                ]),
            )
            .with_field(FieldDef::optional("armor", ValueKind::Int, 0))
            .with_field(
                FieldDef::optional_nil("callsign", ValueKind::String)
                    .with_predicate(|v: &Value| v.as_str().is_some_and(|s| !s.is_empty())),
            )
    }

    #[test]
    fn valid_data_passes() {
        let data = data_from_json(&json!({"hp": 120, "stance": "attack", "callsign": "Red-1"})).unwrap();
        assert!(unit_schema().validate(&data).is_ok());
    }

    #[test]
    fn every_violation_is_reported() {
        let data = data_from_json(&json!({
            "hp": 2000,
            "stance": "flee",
            "armor": 1.5,
            "callsign": ""
        }))
        .unwrap();
        let errors = unit_schema().validate(&data).unwrap_err();
        assert_eq!(errors.len(), 4, "{errors:?}");
        assert!(errors.iter().any(|e| e.contains("outside range")));
        assert!(errors.iter().any(|e| e.contains("not one of")));
        assert!(errors.iter().any(|e| e.contains("expected int, found float")));
        assert!(errors.iter().any(|e| e.contains("custom check failed")));
    }

    #[test]
    fn missing_required_field_is_reported() {
        let errors = unit_schema().validate(&ComponentData::new()).unwrap_err();
        assert_eq!(errors, vec!["Unit.hp: required field is missing".to_owned()]);
    }

    #[test]
    fn predicate_reason_is_kept() {
        let schema = ComponentSchema::new("Ammo").with_field(
            FieldDef::required("rounds", ValueKind::Int).with_predicate(|v: &Value| {
                if v.as_int().unwrap_or(0) % 2 == 0 {
                    Ok(())
                } else {
                    Err("rounds come in pairs".to_owned())
                }
            }),
        );
        let data = data_from_json(&json!({"rounds": 3})).unwrap();
        assert_eq!(
            schema.validate(&data).unwrap_err(),
            vec!["Ammo.rounds: rounds come in pairs".to_owned()]
        );
    }

    #[test]
    fn apply_defaults_leaves_required_absent_and_input_untouched() {
        let schema = unit_schema();
        let input = ComponentData::new();
        let filled = schema.apply_defaults(&input);
        assert!(input.is_empty());
        assert_eq!(filled.get("stance"), Some(&Value::from("idle")));
        assert_eq!(filled.get("armor"), Some(&Value::Int(0)));
        assert!(!filled.contains_key("hp"));
        assert!(!filled.contains_key("callsign"));
        assert!(schema.validate(&filled).is_err());
    }

    #[test]
    fn reference_fields_are_declared_explicitly() {
        let schema = ComponentSchema::new("Squad")
            .with_field(FieldDef::entity_ref("leader"))
            .with_field(FieldDef::entity_refs("members"))
            .with_field(FieldDef::optional("morale", ValueKind::Float, 1.0));
        assert!(schema.declares_references());
        assert_eq!(schema.reference_fields().count(), 2);

        let data = data_from_json(&json!({"members": [4, "x"]})).unwrap();
        let errors = schema.validate(&data).unwrap_err();
        assert_eq!(errors, vec!["Squad.members[1]: expected entity id, found string".to_owned()]);
    }
}
