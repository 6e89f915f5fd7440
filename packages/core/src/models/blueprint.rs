//! Blueprints
//!
//! A [`Blueprint`] is the frozen, shared definition of one node type: the
//! ordered property definitions plus the registered rules. It is built once
//! with [`BlueprintBuilder`], validated, and then shared (`Arc`) by every
//! node instantiated from it.
//!
//! Rule ids are assigned by registration sequence, so any two processes that
//! build the same blueprint in the same order agree on every id.

use crate::error::EngineError;
use crate::models::{Value, ValueKind};
use crate::rules::{AsyncRule, RuleSet, SyncRule};
use std::collections::HashMap;
use std::sync::Arc;

/// Definition of a single property slot.
#[derive(Debug, Clone)]
pub struct PropertyDef {
    name: String,
    kind: ValueKind,
    default: Value,
    read_only: bool,
}

impl PropertyDef {
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            default: Value::Null,
            read_only: false,
        }
    }

    /// A child-node slot. Starts out null; assigning a node attaches it.
    pub fn node(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::Node)
    }

    /// A child-list slot. Every node instantiated from the blueprint gets its
    /// own empty list here; the slot itself is not reassignable.
    pub fn list(name: impl Into<String>) -> Self {
        Self::new(name, ValueKind::List)
    }

    /// Reject writes through the editing surface. Loads still apply.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Initial value for new nodes. Must fit the declared kind.
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = value.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn default_value(&self) -> &Value {
        &self.default
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}

/// Frozen definition of a node type.
pub struct Blueprint {
    type_name: String,
    properties: Vec<PropertyDef>,
    index: HashMap<String, usize>,
    rules: RuleSet,
}

impl Blueprint {
    /// Start building a blueprint for `type_name`.
    pub fn builder(type_name: impl Into<String>) -> BlueprintBuilder {
        BlueprintBuilder {
            type_name: type_name.into(),
            properties: Vec::new(),
            rules: RuleSet::default(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub(crate) fn properties(&self) -> &[PropertyDef] {
        &self.properties
    }

    pub(crate) fn property_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub(crate) fn rules(&self) -> &RuleSet {
        &self.rules
    }
}

impl std::fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Blueprint")
            .field("type_name", &self.type_name)
            .field("properties", &self.properties.len())
            .field("rules", &self.rules.len())
            .finish()
    }
}

/// Builder for [`Blueprint`].
///
/// Properties and rules are registered here; `build` validates the result
/// and freezes it.
pub struct BlueprintBuilder {
    type_name: String,
    properties: Vec<PropertyDef>,
    rules: RuleSet,
}

impl BlueprintBuilder {
    /// Register a property. Registration order is the slot order.
    pub fn property(mut self, def: PropertyDef) -> Self {
        self.properties.push(def);
        self
    }

    /// Register a sync rule. Registration order assigns its id.
    pub fn sync_rule(mut self, rule: impl SyncRule + 'static) -> Self {
        self.rules.register_sync(Box::new(rule));
        self
    }

    /// Register an async rule. Registration order assigns its id.
    pub fn async_rule(mut self, rule: impl AsyncRule + 'static) -> Self {
        self.rules.register_async(Box::new(rule));
        self
    }

    /// Validate and freeze.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateProperty`] when two properties share a
    /// name and [`EngineError::KindMismatch`] when a default value does not
    /// fit its declared kind.
    pub fn build(self) -> Result<Arc<Blueprint>, EngineError> {
        let mut index = HashMap::with_capacity(self.properties.len());
        for (i, def) in self.properties.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(EngineError::duplicate_property(&def.name));
            }
            if !def.default.fits(def.kind) {
                return Err(EngineError::kind_mismatch(
                    &def.name,
                    def.kind,
                    def.default.kind(),
                ));
            }
        }
        Ok(Arc::new(Blueprint {
            type_name: self.type_name,
            properties: self.properties,
            index,
            rules: self.rules,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{RuleOutcome, SyncFn};

    #[test]
    fn test_build_rejects_duplicate_property() {
        let result = Blueprint::builder("Order")
            .property(PropertyDef::new("Total", ValueKind::Int))
            .property(PropertyDef::new("Total", ValueKind::Text))
            .build();
        assert!(matches!(
            result,
            Err(EngineError::DuplicateProperty { ref name }) if name == "Total"
        ));
    }

    #[test]
    fn test_build_rejects_default_kind_mismatch() {
        let result = Blueprint::builder("Order")
            .property(PropertyDef::new("Total", ValueKind::Int).with_default("ten"))
            .build();
        assert!(matches!(result, Err(EngineError::KindMismatch { .. })));
    }

    #[test]
    fn test_null_default_fits_any_kind() {
        let blueprint = Blueprint::builder("Order")
            .property(PropertyDef::new("Total", ValueKind::Int))
            .property(PropertyDef::node("Customer"))
            .property(PropertyDef::list("Lines"))
            .build()
            .unwrap();
        assert_eq!(blueprint.property_count(), 3);
        assert_eq!(blueprint.property_index("Customer"), Some(1));
        assert_eq!(blueprint.property_index("Missing"), None);
    }

    #[test]
    fn test_rules_registered_in_sequence() {
        let blueprint = Blueprint::builder("Order")
            .property(PropertyDef::new("A", ValueKind::Int))
            .sync_rule(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok())))
            .sync_rule(SyncFn::new(["A"], |_| Ok(RuleOutcome::ok())))
            .build()
            .unwrap();
        assert_eq!(blueprint.rule_count(), 2);
    }
}
