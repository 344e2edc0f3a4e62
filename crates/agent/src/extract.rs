//! Safe attribute extraction via string-named accessor chains.
//!
//! Rules name accessors as strings (`"getId"`, `"getUser.getName"`),
//! so extraction happens against targets whose concrete type is only
//! known at call time. Targets expose their accessor set through the
//! [`Inspect`] capability; the evaluator invokes accessors by name and
//! reduces every failure category to "no value", logged at debug
//! granularity only; extraction must never interrupt the intercepted
//! call path.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

// ── Capability ──────────────────────────────────────────────────────

/// Why an accessor invocation produced no value.
#[derive(Debug, Error)]
pub enum AccessorError {
    /// The target's accessor set has no accessor with this name.
    #[error("no accessor named '{0}'")]
    NotFound(String),

    /// The accessor exists but failed while executing.
    #[error("accessor failed: {0}")]
    Failed(String),
}

/// A runtime object with string-named zero-argument accessors.
///
/// `Ok(None)` means the accessor resolved and returned no value (the
/// analogue of a null result); chains short-circuit on it.
pub trait Inspect {
    /// Runtime type name, used in logs and as the cache key component.
    fn type_label(&self) -> &'static str;

    /// Label under which resolution outcomes may be cached, or `None`
    /// for targets whose accessor set varies per instance (e.g. plain
    /// data trees).
    fn cache_label(&self) -> Option<&'static str> {
        Some(self.type_label())
    }

    /// Invoke the named zero-argument accessor.
    fn accessor(&self, name: &str) -> Result<Option<Value>, AccessorError>;
}

/// Dynamic fallback adapter: treats a JSON object as an accessor set.
/// `getFoo` (or plain `foo`) resolves to field `foo`.
pub struct JsonTarget<'a>(pub &'a Value);

impl Inspect for JsonTarget<'_> {
    fn type_label(&self) -> &'static str {
        "json"
    }

    // Field sets differ per instance; a shared cache entry would leak
    // one object's misses onto every other object.
    fn cache_label(&self) -> Option<&'static str> {
        None
    }

    fn accessor(&self, name: &str) -> Result<Option<Value>, AccessorError> {
        let Value::Object(fields) = self.0 else {
            return Err(AccessorError::Failed(format!(
                "value is not an object, cannot resolve '{}'",
                name
            )));
        };

        if let Some(value) = fields.get(name) {
            return Ok(Some(value.clone()));
        }

        // Getter-style name: strip the prefix and lowercase the head.
        if let Some(rest) = name.strip_prefix("get") {
            let mut chars = rest.chars();
            if let Some(head) = chars.next() {
                let field: String = head.to_lowercase().chain(chars).collect();
                if let Some(value) = fields.get(&field) {
                    return Ok(Some(value.clone()));
                }
            }
        }

        Err(AccessorError::NotFound(name.to_string()))
    }
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Invokes accessors by name with a resolution cache keyed by
/// (type label, accessor name), so repeated lookups of an accessor a
/// type does not have skip dispatch entirely. The cache tolerates
/// unsynchronized concurrent readers and writers.
#[derive(Default)]
pub struct AccessorEvaluator {
    /// (type label, accessor) → whether the accessor resolved.
    cache: RwLock<HashMap<(&'static str, String), bool>>,
}

impl AccessorEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Invoke one named accessor; every failure reduces to `None`.
    ///
    /// A resolved accessor returning JSON `null` is also `None`, so a
    /// chain never continues through a null value.
    pub fn invoke_safe(&self, target: &dyn Inspect, name: &str) -> Option<Value> {
        if name.is_empty() {
            debug!(target = target.type_label(), "empty accessor name");
            return None;
        }

        let cache_key = target
            .cache_label()
            .map(|label| (label, name.to_string()));

        if let Some(key) = &cache_key {
            let cache = self.cache.read().expect("accessor cache lock poisoned");
            if cache.get(key) == Some(&false) {
                // Known-missing accessor: skip dispatch.
                return None;
            }
        }

        match target.accessor(name) {
            Ok(result) => {
                self.record(cache_key, true);
                result.filter(|v| !v.is_null())
            }
            Err(AccessorError::NotFound(_)) => {
                debug!(target = target.type_label(), accessor = name, "accessor not found");
                self.record(cache_key, false);
                None
            }
            Err(AccessorError::Failed(reason)) => {
                debug!(
                    target = target.type_label(),
                    accessor = name,
                    reason = %reason,
                    "accessor invocation failed"
                );
                self.record(cache_key, true);
                None
            }
        }
    }

    /// Evaluate a dot-separated accessor chain left to right.
    ///
    /// The first step runs against the target's own accessor set;
    /// later steps traverse the produced value as plain data. If any
    /// step yields no value the chain short-circuits without
    /// attempting subsequent steps.
    pub fn invoke_chain(&self, target: &dyn Inspect, chain: &str) -> Option<Value> {
        if chain.is_empty() {
            debug!(target = target.type_label(), "empty accessor chain");
            return None;
        }

        let mut steps = chain.split('.').map(str::trim);
        let first = steps.next()?;
        let mut current = self.invoke_safe(target, first)?;

        for step in steps {
            current = self.invoke_safe(&JsonTarget(&current), step)?;
        }

        Some(current)
    }

    fn record(&self, key: Option<(&'static str, String)>, resolved: bool) {
        if let Some(key) = key {
            self.cache
                .write()
                .expect("accessor cache lock poisoned")
                .insert(key, resolved);
        }
    }

    pub fn clear_cache(&self) {
        self.cache
            .write()
            .expect("accessor cache lock poisoned")
            .clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.read().expect("accessor cache lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// Stand-in for an application object observed at call time.
    struct Order {
        calls: AtomicUsize,
    }

    impl Order {
        fn new() -> Self {
            Self { calls: AtomicUsize::new(0) }
        }
    }

    impl Inspect for Order {
        fn type_label(&self) -> &'static str {
            "Order"
        }

        fn accessor(&self, name: &str) -> Result<Option<Value>, AccessorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match name {
                "getId" => Ok(Some(json!("ord-42"))),
                "getTotal" => Ok(Some(json!(99.5))),
                "getCustomer" => Ok(Some(json!({
                    "name": "Ada",
                    "address": {"city": "Zurich"}
                }))),
                "getCoupon" => Ok(None),
                "getBroken" => Err(AccessorError::Failed("boom".to_string())),
                other => Err(AccessorError::NotFound(other.to_string())),
            }
        }
    }

    #[test]
    fn invoke_safe_returns_value() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();
        assert_eq!(evaluator.invoke_safe(&order, "getId"), Some(json!("ord-42")));
    }

    #[test]
    fn every_failure_reduces_to_none() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();

        assert_eq!(evaluator.invoke_safe(&order, "getMissing"), None);
        assert_eq!(evaluator.invoke_safe(&order, "getBroken"), None);
        assert_eq!(evaluator.invoke_safe(&order, "getCoupon"), None);
        assert_eq!(evaluator.invoke_safe(&order, ""), None);
    }

    #[test]
    fn known_missing_accessor_skips_dispatch() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();

        assert_eq!(evaluator.invoke_safe(&order, "getMissing"), None);
        let after_first = order.calls.load(Ordering::SeqCst);
        assert_eq!(evaluator.invoke_safe(&order, "getMissing"), None);
        assert_eq!(order.calls.load(Ordering::SeqCst), after_first);
    }

    #[test]
    fn chain_traverses_nested_values() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();

        assert_eq!(
            evaluator.invoke_chain(&order, "getCustomer.getName"),
            Some(json!("Ada"))
        );
        // Plain field names work on data steps too.
        assert_eq!(
            evaluator.invoke_chain(&order, "getCustomer.address.city"),
            Some(json!("Zurich"))
        );
        assert_eq!(evaluator.invoke_chain(&order, "getId"), Some(json!("ord-42")));
    }

    #[test]
    fn chain_short_circuits_on_empty_step() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();

        // getCoupon resolves to no value: the chain must stop there.
        assert_eq!(evaluator.invoke_chain(&order, "getCoupon.getCode"), None);
        assert_eq!(evaluator.invoke_chain(&order, "getMissing.getAnything"), None);
        assert_eq!(evaluator.invoke_chain(&order, ""), None);
    }

    #[test]
    fn chain_stops_at_non_object_values() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();
        assert_eq!(evaluator.invoke_chain(&order, "getTotal.getCents"), None);
    }

    #[test]
    fn json_target_resolves_getter_and_field_names() {
        let value = json!({"id": 7, "status": "open"});
        let target = JsonTarget(&value);
        let evaluator = AccessorEvaluator::new();

        assert_eq!(evaluator.invoke_safe(&target, "getId"), Some(json!(7)));
        assert_eq!(evaluator.invoke_safe(&target, "status"), Some(json!("open")));
        assert_eq!(evaluator.invoke_safe(&target, "getNope"), None);
    }

    #[test]
    fn json_target_misses_are_not_cached() {
        let evaluator = AccessorEvaluator::new();

        let a = json!({"other": 1});
        assert_eq!(evaluator.invoke_safe(&JsonTarget(&a), "getId"), None);

        // A different object with that field must still resolve.
        let b = json!({"id": 2});
        assert_eq!(evaluator.invoke_safe(&JsonTarget(&b), "getId"), Some(json!(2)));
        assert_eq!(evaluator.cache_size(), 0);
    }

    #[test]
    fn cache_maintenance() {
        let evaluator = AccessorEvaluator::new();
        let order = Order::new();

        evaluator.invoke_safe(&order, "getId");
        evaluator.invoke_safe(&order, "getMissing");
        assert_eq!(evaluator.cache_size(), 2);

        evaluator.clear_cache();
        assert_eq!(evaluator.cache_size(), 0);

        // After clearing, resolution runs again.
        let before = order.calls.load(Ordering::SeqCst);
        evaluator.invoke_safe(&order, "getMissing");
        assert_eq!(order.calls.load(Ordering::SeqCst), before + 1);
    }
}
