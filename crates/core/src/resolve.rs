//! Hierarchy-aware rule resolution.
//!
//! One polymorphic walk shared by every lookup path: the snapshot in
//! the configuration manager and the serialized entries in the rule
//! registry both resolve through [`resolve_in_hierarchy`], so the
//! tie-break order cannot drift between the two.

use serde::{Deserialize, Serialize};

// ── Ancestry description ────────────────────────────────────────────

/// A superclass entry together with its directly implemented
/// interfaces, in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuperType {
    pub type_name: String,
    #[serde(default)]
    pub interfaces: Vec<String>,
}

/// Ordered ancestry description of a runtime type, supplied by the
/// caller (only callers see live type metadata).
///
/// `supers` lists the superclass chain nearest-first and stops before
/// the universal root type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeAncestry {
    pub type_name: String,
    /// Interfaces directly implemented by the type, declaration order.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub supers: Vec<SuperType>,
}

impl TypeAncestry {
    /// Ancestry of a type with no interfaces and no superclasses.
    pub fn leaf(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            interfaces: Vec::new(),
            supers: Vec::new(),
        }
    }

    /// Candidate type names in resolution order: self, self's
    /// interfaces, then each superclass followed by its interfaces.
    pub fn candidates(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.type_name.as_str())
            .chain(self.interfaces.iter().map(String::as_str))
            .chain(self.supers.iter().flat_map(|sup| {
                std::iter::once(sup.type_name.as_str())
                    .chain(sup.interfaces.iter().map(String::as_str))
            }))
    }
}

// ── Match result ────────────────────────────────────────────────────

/// Where a matched rule came from in the type hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    SelfType,
    Interface,
    Superclass,
}

/// A resolved rule tagged with the type it was registered under and
/// its provenance in the hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch<T> {
    pub source_type: String,
    pub provenance: Provenance,
    pub rule: T,
}

/// Walk the ancestry in fixed order and return the first rule the
/// lookup yields. First match wins; no merging across matches.
///
/// Order: the type itself, its interfaces in declaration order, then
/// each superclass (nearest first) followed by that superclass's
/// interfaces.
pub fn resolve_in_hierarchy<T>(
    ancestry: &TypeAncestry,
    lookup: impl Fn(&str) -> Option<T>,
) -> Option<RuleMatch<T>> {
    if let Some(rule) = lookup(&ancestry.type_name) {
        return Some(RuleMatch {
            source_type: ancestry.type_name.clone(),
            provenance: Provenance::SelfType,
            rule,
        });
    }

    for iface in &ancestry.interfaces {
        if let Some(rule) = lookup(iface) {
            return Some(RuleMatch {
                source_type: iface.clone(),
                provenance: Provenance::Interface,
                rule,
            });
        }
    }

    for sup in &ancestry.supers {
        if let Some(rule) = lookup(&sup.type_name) {
            return Some(RuleMatch {
                source_type: sup.type_name.clone(),
                provenance: Provenance::Superclass,
                rule,
            });
        }
        for iface in &sup.interfaces {
            if let Some(rule) = lookup(iface) {
                return Some(RuleMatch {
                    source_type: iface.clone(),
                    provenance: Provenance::Interface,
                    rule,
                });
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ancestry() -> TypeAncestry {
        TypeAncestry {
            type_name: "C".to_string(),
            interfaces: vec!["I".to_string(), "J".to_string()],
            supers: vec![
                SuperType {
                    type_name: "B".to_string(),
                    interfaces: vec!["K".to_string()],
                },
                SuperType {
                    type_name: "A".to_string(),
                    interfaces: Vec::new(),
                },
            ],
        }
    }

    fn lookup_in<'a>(known: &'a [&str]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| known.contains(&name).then(|| name.to_string())
    }

    #[test]
    fn self_wins_over_everything() {
        let m = resolve_in_hierarchy(&ancestry(), lookup_in(&["C", "I", "B"])).unwrap();
        assert_eq!(m.source_type, "C");
        assert_eq!(m.provenance, Provenance::SelfType);
    }

    #[test]
    fn interface_wins_over_superclass() {
        // Both an interface and a superclass carry a rule for the
        // operation: the interface must win.
        let m = resolve_in_hierarchy(&ancestry(), lookup_in(&["I", "B"])).unwrap();
        assert_eq!(m.source_type, "I");
        assert_eq!(m.provenance, Provenance::Interface);
    }

    #[test]
    fn interfaces_checked_in_declaration_order() {
        let m = resolve_in_hierarchy(&ancestry(), lookup_in(&["J", "I"])).unwrap();
        assert_eq!(m.source_type, "I");
    }

    #[test]
    fn superclass_before_its_interfaces() {
        let m = resolve_in_hierarchy(&ancestry(), lookup_in(&["B", "K"])).unwrap();
        assert_eq!(m.source_type, "B");
        assert_eq!(m.provenance, Provenance::Superclass);
    }

    #[test]
    fn superclass_interface_before_deeper_superclass() {
        let m = resolve_in_hierarchy(&ancestry(), lookup_in(&["K", "A"])).unwrap();
        assert_eq!(m.source_type, "K");
        assert_eq!(m.provenance, Provenance::Interface);
    }

    #[test]
    fn no_match_yields_none() {
        assert!(resolve_in_hierarchy(&ancestry(), lookup_in(&["X"])).is_none());
    }

    #[test]
    fn candidates_order_is_fixed() {
        let ancestry = ancestry();
        let order: Vec<_> = ancestry.candidates().collect();
        assert_eq!(order, vec!["C", "I", "J", "B", "K", "A"]);
    }
}
