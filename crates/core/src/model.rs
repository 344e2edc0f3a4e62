//! Rule document schema with serde deserialization.
//!
//! Defines the externally-sourced rule document (`RuleSet`) and its
//! parts: explicit per-method rules, package-level wildcard rules, and
//! the attribute extraction descriptors. Field names on the wire are
//! camelCase; unknown fields are ignored for forward compatibility.

use serde::{Deserialize, Serialize};

// ── Attribute descriptors ───────────────────────────────────────────

/// Extraction rule for a single method argument.
///
/// `method_call` is a dot-separated accessor chain invoked on the
/// argument; `None` (or empty on the wire) means the argument's own
/// value is used directly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgumentAttribute {
    pub arg_index: usize,
    #[serde(default)]
    pub method_call: Option<String>,
    pub attribute_name: String,
}

/// Extraction rule for a method's return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnAttribute {
    #[serde(default)]
    pub method_call: Option<String>,
    pub attribute_name: String,
}

// ── Explicit and package rules ──────────────────────────────────────

/// Interception rule for one named operation on one named type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplicitRule {
    pub class_name: String,
    pub method_name: String,
    #[serde(default)]
    pub attributes: Vec<ArgumentAttribute>,
    #[serde(default)]
    pub return_value_attributes: Vec<ReturnAttribute>,
    /// Method-level override of the concrete-only setting.
    #[serde(default)]
    pub concrete_only: Option<bool>,
}

impl ExplicitRule {
    /// Registry key for this rule: `"Type#method"`.
    pub fn key(&self) -> String {
        rule_key(&self.class_name, &self.method_name)
    }
}

/// Wildcard rule matching every type under a package prefix.
///
/// `recursive = false` restricts the match to direct children of the
/// prefix. `annotations`, when non-empty, lists annotations of which
/// at least one must be present on the type; that filter is applied by
/// callers with access to live type metadata, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRule {
    pub package_name: String,
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub annotations: Vec<String>,
}

impl PackageRule {
    /// Check whether `type_name` falls under this package rule's scope.
    ///
    /// The annotation filter is intentionally not applied here.
    pub fn matches(&self, type_name: &str) -> bool {
        let Some(remainder) = type_name.strip_prefix(&self.package_name) else {
            return false;
        };
        let Some(remainder) = remainder.strip_prefix('.') else {
            return false;
        };
        if remainder.is_empty() {
            return false;
        }
        self.recursive || !remainder.contains('.')
    }
}

// ── Root document ───────────────────────────────────────────────────

/// Root rule document, parsed from JSON. Immutable once parsed; a
/// reload produces a brand-new `RuleSet`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleSet {
    #[serde(default)]
    pub instrumentations: Vec<ExplicitRule>,
    #[serde(default)]
    pub packages: Vec<PackageRule>,
    /// Global default for the concrete-only setting.
    #[serde(default)]
    pub concrete_only: Option<bool>,
}

impl RuleSet {
    /// Number of explicit rules defined.
    pub fn len(&self) -> usize {
        self.instrumentations.len()
    }

    /// True when no explicit rules and no package rules are defined.
    pub fn is_empty(&self) -> bool {
        self.instrumentations.is_empty() && self.packages.is_empty()
    }
}

/// Build the canonical `"Type#method"` key used by the snapshot index,
/// the registry, and checksum maps.
pub fn rule_key(type_name: &str, method_name: &str) -> String {
    format!("{}#{}", type_name, method_name)
}

/// Strip the `#method` suffix from a rule key, yielding the type name.
/// A key without a separator, or with nothing before it, is malformed
/// and yields `None`.
pub fn type_of_key(key: &str) -> Option<&str> {
    match key.find('#') {
        Some(idx) if idx > 0 => Some(&key[..idx]),
        _ => None,
    }
}
