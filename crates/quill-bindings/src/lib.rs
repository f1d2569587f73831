// SPDX-License-Identifier: Apache-2.0
//! Binding-layer boundary for Quill settings UIs.
//!
//! The rendering layer binds visual controls to settings keys; this crate
//! gives it a typed vocabulary: a tagged [`InputKind`] sum type over the
//! supported input descriptors, an [`InputDescriptor`] carrying identity
//! and copy, and a [`BindingRegistry`] that rejects duplicate identifiers
//! loudly instead of silently overwriting a binding. Widget construction
//! and layout stay out of scope.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Errors surfaced by the binding registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    /// Two descriptors were registered under the same identifier. This is
    /// a programmer error in the catalog, not a runtime condition.
    #[error("duplicate binding identifier: {0}")]
    DuplicateIdentifier(String),
}

/// One option of a [`InputKind::Select`] input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    /// Stored value.
    pub value: String,
    /// Display name shown to the user.
    pub label: String,
}

/// The kinds of input a settings control can bind to, each carrying its own
/// payload. Serialized with a `type` tag so descriptor catalogs round-trip
/// as data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputKind {
    /// Boolean toggle.
    Checkbox {
        /// Initial value.
        default: bool,
    },
    /// Free-form text field.
    Text {
        /// Initial value.
        default: String,
    },
    /// Numeric input with an allowed range.
    Numeric {
        /// Initial value.
        default: f64,
        /// Inclusive lower bound.
        min: f64,
        /// Inclusive upper bound.
        max: f64,
    },
    /// Single-choice dropdown.
    Select {
        /// Initial stored value.
        default: String,
        /// Choices, in display order.
        options: Vec<SelectOption>,
    },
    /// Labeled action button. Carries no persisted value.
    Button {
        /// Button label.
        label: String,
    },
    /// Icon-only action button. Carries no persisted value.
    IconButton {
        /// Icon name.
        icon: String,
    },
}

impl InputKind {
    /// The value this input contributes to a defaults document, or `None`
    /// for action-only inputs.
    pub fn default_value(&self) -> Option<Value> {
        match self {
            Self::Checkbox { default } => Some(Value::Bool(*default)),
            Self::Text { default } | Self::Select { default, .. } => {
                Some(Value::String(default.clone()))
            }
            Self::Numeric { default, .. } => serde_json::Number::from_f64(*default).map(Value::Number),
            Self::Button { .. } | Self::IconButton { .. } => None,
        }
    }
}

/// Predicate deciding whether a control renders disabled for the current
/// settings document.
pub type DisablePredicate = fn(&Value) -> bool;

/// A settings control description: identity, copy, and input kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDescriptor {
    /// Settings key this control binds to. Unique within a registry.
    pub identifier: String,
    /// Title shown next to the control.
    pub title: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional hover tooltip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    /// What kind of input renders for this key.
    pub kind: InputKind,
    /// Optional predicate disabling the control based on the current
    /// settings document. Runtime-only: catalogs loaded from data carry
    /// none.
    #[serde(skip)]
    pub disabled_when: Option<DisablePredicate>,
}

impl InputDescriptor {
    /// Whether this control should render disabled for `settings`.
    pub fn is_disabled(&self, settings: &Value) -> bool {
        self.disabled_when.is_some_and(|predicate| predicate(settings))
    }
}

/// Catalog of input descriptors keyed by identifier, iterated in
/// registration order.
#[derive(Debug, Default)]
pub struct BindingRegistry {
    order: Vec<String>,
    descriptors: HashMap<String, InputDescriptor>,
}

impl BindingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::DuplicateIdentifier`] when a descriptor with
    /// the same identifier is already registered; the existing binding is
    /// left untouched.
    pub fn register(&mut self, descriptor: InputDescriptor) -> Result<(), BindingError> {
        if self.descriptors.contains_key(&descriptor.identifier) {
            return Err(BindingError::DuplicateIdentifier(descriptor.identifier));
        }
        self.order.push(descriptor.identifier.clone());
        self.descriptors
            .insert(descriptor.identifier.clone(), descriptor);
        Ok(())
    }

    /// Look up a descriptor by identifier.
    pub fn descriptor(&self, identifier: &str) -> Option<&InputDescriptor> {
        self.descriptors.get(identifier)
    }

    /// Descriptors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &InputDescriptor> {
        self.order
            .iter()
            .filter_map(|identifier| self.descriptors.get(identifier))
    }

    /// Number of registered descriptors.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Fold the catalog into a Schema Defaults document of the shape
    /// `{ "settings": { <identifier>: <default>, ... } }`, skipping
    /// action-only inputs.
    pub fn default_document(&self) -> Value {
        let mut settings = Map::new();
        for descriptor in self.iter() {
            if let Some(value) = descriptor.kind.default_value() {
                settings.insert(descriptor.identifier.clone(), value);
            }
        }
        let mut doc = Map::new();
        doc.insert("settings".into(), Value::Object(settings));
        Value::Object(doc)
    }
}
