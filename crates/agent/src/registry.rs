//! Process-wide rule registry with a canonical wire format.
//!
//! Call sites may run in an execution context that cannot reach the
//! configuration manager's object graph, so this registry stores rules
//! as canonical serialized strings behind a minimal key-value surface:
//! the serialization boundary is explicit, and lookups deserialize
//! from the stored string on every call (intentionally uncached at
//! this layer).
//!
//! Wire format per `"Type#method"` key:
//! - argument rules: `argIndex|methodCall|attributeName` entries
//!   joined by `;` (empty methodCall field means "use the argument
//!   value directly")
//! - return rules: `methodCall|attributeName` entries joined by `;`
//!
//! Each key also carries a content checksum used for change detection
//! during hot-reload; when both rule kinds are present the checksum is
//! `argChecksum:returnChecksum`.

use std::collections::HashMap;
use std::sync::RwLock;

use sha2::{Digest, Sha256};
use tracing::debug;

use dynaprobe_core::{
    resolve_in_hierarchy, rule_key, ArgumentAttribute, ReturnAttribute, RuleMatch, TypeAncestry,
};

const FIELD_SEP: char = '|';
const ENTRY_SEP: char = ';';
const CHECKSUM_SEP: char = ':';

// ── Serialization ───────────────────────────────────────────────────

fn serialize_arg_rules(rules: &[ArgumentAttribute]) -> String {
    rules
        .iter()
        .map(|r| {
            format!(
                "{}{}{}{}{}",
                r.arg_index,
                FIELD_SEP,
                r.method_call.as_deref().unwrap_or(""),
                FIELD_SEP,
                r.attribute_name
            )
        })
        .collect::<Vec<_>>()
        .join(&ENTRY_SEP.to_string())
}

fn serialize_return_rules(rules: &[ReturnAttribute]) -> String {
    rules
        .iter()
        .map(|r| {
            format!(
                "{}{}{}",
                r.method_call.as_deref().unwrap_or(""),
                FIELD_SEP,
                r.attribute_name
            )
        })
        .collect::<Vec<_>>()
        .join(&ENTRY_SEP.to_string())
}

fn parse_arg_rules(value: &str) -> Vec<ArgumentAttribute> {
    let mut rules = Vec::new();
    for entry in value.split(ENTRY_SEP) {
        let parts: Vec<&str> = entry.split(FIELD_SEP).collect();
        if parts.len() != 3 {
            continue;
        }
        let Ok(arg_index) = parts[0].parse::<usize>() else {
            continue;
        };
        rules.push(ArgumentAttribute {
            arg_index,
            method_call: (!parts[1].is_empty()).then(|| parts[1].to_string()),
            attribute_name: parts[2].to_string(),
        });
    }
    rules
}

fn parse_return_rules(value: &str) -> Vec<ReturnAttribute> {
    let mut rules = Vec::new();
    for entry in value.split(ENTRY_SEP) {
        let parts: Vec<&str> = entry.split(FIELD_SEP).collect();
        if parts.len() != 2 {
            continue;
        }
        rules.push(ReturnAttribute {
            method_call: (!parts[0].is_empty()).then(|| parts[0].to_string()),
            attribute_name: parts[1].to_string(),
        });
    }
    rules
}

// ── Checksums ───────────────────────────────────────────────────────

/// 32 lowercase hex chars over the canonical serialized content: the
/// first 16 bytes of a SHA-256 digest. Change detection only, never a
/// security boundary.
fn content_checksum(canonical: &str) -> String {
    let digest = Sha256::digest(canonical.as_bytes());
    digest[..16].iter().map(|b| format!("{:02x}", b)).collect()
}

/// Checksum input uses a trailing separator per entry so that entry
/// boundaries stay unambiguous in the digested text.
fn checksum_input(serialized: &str) -> String {
    if serialized.is_empty() {
        String::new()
    } else {
        format!("{}{}", serialized, ENTRY_SEP)
    }
}

/// Checksum over a list of argument rules; empty list yields "".
pub fn arg_rules_checksum(rules: &[ArgumentAttribute]) -> String {
    if rules.is_empty() {
        return String::new();
    }
    content_checksum(&checksum_input(&serialize_arg_rules(rules)))
}

/// Checksum over a list of return rules; empty list yields "".
pub fn return_rules_checksum(rules: &[ReturnAttribute]) -> String {
    if rules.is_empty() {
        return String::new();
    }
    content_checksum(&checksum_input(&serialize_return_rules(rules)))
}

// ── Registry ────────────────────────────────────────────────────────

/// Serialization-based rule store keyed by `"Type#method"`, holding at
/// most one entry per key. All operations are safe for arbitrary
/// concurrent callers; the `clear()` + re-register sequence during a
/// reload is not transactional, so a concurrent lookup may briefly
/// observe no rule for a key that is mid-reload. Consumers must treat
/// a missing rule as "skip extraction for this call", never an error.
#[derive(Default)]
pub struct RuleRegistry {
    arg_rules: RwLock<HashMap<String, String>>,
    return_rules: RwLock<HashMap<String, String>>,
    checksums: RwLock<HashMap<String, String>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize and store argument rules for one (type, operation)
    /// pair, along with their content checksum. An empty rule list is
    /// a no-op.
    pub fn register(&self, type_name: &str, method_name: &str, rules: &[ArgumentAttribute]) {
        if rules.is_empty() {
            return;
        }
        let key = rule_key(type_name, method_name);
        let serialized = serialize_arg_rules(rules);
        let checksum = arg_rules_checksum(rules);
        debug!(key = %key, count = rules.len(), "registering argument rules");

        self.arg_rules
            .write()
            .expect("arg_rules lock poisoned")
            .insert(key.clone(), serialized);
        self.checksums
            .write()
            .expect("checksums lock poisoned")
            .insert(key, checksum);
    }

    /// Serialize and store return-value rules; the key's checksum
    /// becomes `argChecksum:returnChecksum` so one checksum covers the
    /// full rule pair. An empty rule list is a no-op.
    pub fn register_return_rules(
        &self,
        type_name: &str,
        method_name: &str,
        rules: &[ReturnAttribute],
    ) {
        if rules.is_empty() {
            return;
        }
        let key = rule_key(type_name, method_name);
        let serialized = serialize_return_rules(rules);
        let return_checksum = return_rules_checksum(rules);
        debug!(key = %key, count = rules.len(), "registering return rules");

        self.return_rules
            .write()
            .expect("return_rules lock poisoned")
            .insert(key.clone(), serialized);

        let mut checksums = self.checksums.write().expect("checksums lock poisoned");
        let combined = match checksums.get(&key) {
            Some(existing) if !existing.is_empty() => {
                format!("{}{}{}", existing, CHECKSUM_SEP, return_checksum)
            }
            _ => return_checksum,
        };
        checksums.insert(key, combined);
    }

    /// Deserialize the stored argument rules for a key. Parses from
    /// the canonical string on every call.
    pub fn lookup(&self, type_name: &str, method_name: &str) -> Option<Vec<ArgumentAttribute>> {
        let key = rule_key(type_name, method_name);
        let guard = self.arg_rules.read().expect("arg_rules lock poisoned");
        let value = guard.get(&key).filter(|v| !v.is_empty())?;
        let rules = parse_arg_rules(value);
        (!rules.is_empty()).then_some(rules)
    }

    /// Deserialize the stored return rules for a key.
    pub fn lookup_return(
        &self,
        type_name: &str,
        method_name: &str,
    ) -> Option<Vec<ReturnAttribute>> {
        let key = rule_key(type_name, method_name);
        let guard = self.return_rules.read().expect("return_rules lock poisoned");
        let value = guard.get(&key).filter(|v| !v.is_empty())?;
        let rules = parse_return_rules(value);
        (!rules.is_empty()).then_some(rules)
    }

    /// Hierarchy walk over registry entries, same tie-break order as
    /// the configuration manager's resolution.
    pub fn resolve_for_hierarchy(
        &self,
        ancestry: &TypeAncestry,
        method_name: &str,
    ) -> Option<RuleMatch<Vec<ArgumentAttribute>>> {
        resolve_in_hierarchy(ancestry, |type_name| self.lookup(type_name, method_name))
    }

    /// Hierarchy walk for return-value rules.
    pub fn resolve_return_for_hierarchy(
        &self,
        ancestry: &TypeAncestry,
        method_name: &str,
    ) -> Option<RuleMatch<Vec<ReturnAttribute>>> {
        resolve_in_hierarchy(ancestry, |type_name| self.lookup_return(type_name, method_name))
    }

    /// Stored checksum for one key, if any.
    pub fn checksum_for(&self, type_name: &str, method_name: &str) -> Option<String> {
        self.checksums
            .read()
            .expect("checksums lock poisoned")
            .get(&rule_key(type_name, method_name))
            .cloned()
    }

    /// Full copy of every current checksum, keyed `"Type#method"`.
    /// Taken immediately before and after a reload to feed the diff.
    pub fn snapshot_checksums(&self) -> HashMap<String, String> {
        self.checksums
            .read()
            .expect("checksums lock poisoned")
            .clone()
    }

    /// Remove every rule and checksum entry.
    pub fn clear(&self) {
        self.arg_rules.write().expect("arg_rules lock poisoned").clear();
        self.return_rules.write().expect("return_rules lock poisoned").clear();
        self.checksums.write().expect("checksums lock poisoned").clear();
    }

    /// Number of registered keys.
    pub fn len(&self) -> usize {
        self.checksums.read().expect("checksums lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
