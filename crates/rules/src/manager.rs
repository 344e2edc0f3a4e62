//! Configuration manager: loading, immutable snapshots, match queries.
//!
//! The active [`ConfigSnapshot`] sits behind an atomically-swappable
//! reference: readers clone the `Arc` once and query it without any
//! locking, so a reader can never observe a partially-built snapshot.
//! A reload builds a brand-new snapshot, swaps it in, then notifies
//! change listeners in registration order.
//!
//! A missing or malformed rule document never propagates an error to
//! the caller; it degrades to an empty, safely-queryable `RuleSet` and
//! is logged. The previous snapshot is discarded in that case, not
//! retained.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{error, info, warn};

use dynaprobe_core::{
    resolve_config_path, resolve_in_hierarchy, rule_key, ExplicitRule, PackageRule, RuleMatch,
    RuleSet, TypeAncestry,
};

// ── Snapshot ────────────────────────────────────────────────────────

/// Immutable index built once per load from a [`RuleSet`].
///
/// Never mutated after construction; a reload produces a new snapshot
/// and the old one is dropped once the last reader releases it.
#[derive(Debug)]
pub struct ConfigSnapshot {
    rule_set: RuleSet,
    /// `"Type#method"` → explicit rule.
    rules: HashMap<String, ExplicitRule>,
    /// Type names with at least one explicit rule.
    types: HashSet<String>,
}

impl ConfigSnapshot {
    fn build(rule_set: RuleSet) -> Self {
        let mut rules = HashMap::with_capacity(rule_set.instrumentations.len());
        let mut types = HashSet::new();
        for rule in &rule_set.instrumentations {
            types.insert(rule.class_name.clone());
            rules.insert(rule.key(), rule.clone());
        }
        Self { rule_set, rules, types }
    }

    /// Direct lookup for one (type, operation) pair; no hierarchy walk.
    pub fn rule_for(&self, type_name: &str, method_name: &str) -> Option<&ExplicitRule> {
        self.rules.get(&rule_key(type_name, method_name))
    }

    /// True if the type has at least one explicit rule.
    pub fn has_rules_for_type(&self, type_name: &str) -> bool {
        self.types.contains(type_name)
    }

    /// The rule document this snapshot was built from.
    pub fn rule_set(&self) -> &RuleSet {
        &self.rule_set
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }
}

// ── Loading ─────────────────────────────────────────────────────────

/// Parse the rule document at `path`.
///
/// A missing file or parse failure is logged and yields an empty
/// `RuleSet`; this function never errors outward.
pub fn load_rule_set(path: &Path) -> RuleSet {
    if !path.exists() {
        warn!(path = %path.display(), "rule document not found, using empty configuration");
        return RuleSet::default();
    }

    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to read rule document");
            warn!("using empty configuration due to load failure");
            return RuleSet::default();
        }
    };

    match serde_json::from_str::<RuleSet>(&contents) {
        Ok(rules) => {
            info!(path = %path.display(), count = rules.len(), "rule document loaded");
            rules
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "failed to parse rule document");
            warn!("using empty configuration due to parse failure");
            RuleSet::default()
        }
    }
}

// ── Manager ─────────────────────────────────────────────────────────

/// Handle returned by [`ConfigManager::add_listener`], used to remove
/// the listener later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&RuleSet) + Send + Sync>;

/// Loads the rule document, owns the active snapshot, and answers
/// hierarchy-aware match queries. One instance is constructed at
/// startup and shared by reference with the weaver's matcher and the
/// management interface.
pub struct ConfigManager {
    source_path: PathBuf,
    snapshot: RwLock<Arc<ConfigSnapshot>>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener_id: AtomicU64,
}

impl ConfigManager {
    /// Create a manager and load the initial configuration.
    ///
    /// `explicit` overrides the env var and default path.
    pub fn new(explicit: Option<&str>) -> Self {
        let source_path = resolve_config_path(explicit);
        let initial = load_rule_set(&source_path);
        Self {
            source_path,
            snapshot: RwLock::new(Arc::new(ConfigSnapshot::build(initial))),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Re-read the rule document, swap in a new snapshot, and notify
    /// listeners. Load failures degrade to an empty configuration.
    pub fn reload(&self) {
        let rules = load_rule_set(&self.source_path);
        self.install(rules);
    }

    /// Install a rule document supplied by the embedder (e.g. parsed
    /// from a stream) instead of the configured file.
    pub fn load_from_reader(&self, mut reader: impl Read) {
        let mut contents = String::new();
        let rules = match reader.read_to_string(&mut contents) {
            Ok(_) => match serde_json::from_str::<RuleSet>(&contents) {
                Ok(rules) => {
                    info!(count = rules.len(), "rule document loaded from reader");
                    rules
                }
                Err(e) => {
                    error!(error = %e, "failed to parse rule document from reader");
                    RuleSet::default()
                }
            },
            Err(e) => {
                error!(error = %e, "failed to read rule document from reader");
                RuleSet::default()
            }
        };
        self.install(rules);
    }

    /// Build and atomically publish a new snapshot, then invoke every
    /// listener in registration order. A panicking listener is caught
    /// and logged; the remaining listeners still run.
    fn install(&self, rules: RuleSet) {
        let snapshot = Arc::new(ConfigSnapshot::build(rules));
        {
            let mut active = self.snapshot.write().expect("snapshot lock poisoned");
            *active = Arc::clone(&snapshot);
        }

        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().expect("listeners lock poisoned");
            guard.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        for listener in listeners {
            let rule_set = snapshot.rule_set();
            if catch_unwind(AssertUnwindSafe(|| listener(rule_set))).is_err() {
                error!("configuration change listener panicked");
            }
        }
    }

    /// Take a reference to the active snapshot. Readers operate on the
    /// returned `Arc` without further locking.
    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        Arc::clone(&self.snapshot.read().expect("snapshot lock poisoned"))
    }

    /// Register a change listener, invoked synchronously after every
    /// snapshot swap with the newly-installed rule document.
    pub fn add_listener(&self, listener: impl Fn(&RuleSet) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .lock()
            .expect("listeners lock poisoned")
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a previously registered listener. Returns false if the
    /// id is unknown.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.lock().expect("listeners lock poisoned");
        let before = guard.len();
        guard.retain(|(lid, _)| *lid != id);
        guard.len() != before
    }

    // ── Match queries ───────────────────────────────────────────

    /// True if the type has an explicit rule or falls under a package
    /// rule's scope. Callers with live type metadata must additionally
    /// check the matched package rule's annotation filter.
    pub fn is_type_intercepted(&self, type_name: &str) -> bool {
        let snapshot = self.snapshot();
        snapshot.has_rules_for_type(type_name)
            || snapshot
                .rule_set()
                .packages
                .iter()
                .any(|pkg| pkg.matches(type_name))
    }

    /// The first package rule whose scope covers the type, so callers
    /// can apply the `annotations` filter themselves.
    pub fn matching_package_rule(&self, type_name: &str) -> Option<PackageRule> {
        self.snapshot()
            .rule_set()
            .packages
            .iter()
            .find(|pkg| pkg.matches(type_name))
            .cloned()
    }

    /// Direct lookup in the active snapshot; no hierarchy walk.
    pub fn operation_rule_for(&self, type_name: &str, method_name: &str) -> Option<ExplicitRule> {
        self.snapshot().rule_for(type_name, method_name).cloned()
    }

    /// Resolve a rule across the type hierarchy: self first, then
    /// interfaces in declaration order, then the superclass chain.
    pub fn resolve_for_hierarchy(
        &self,
        ancestry: &TypeAncestry,
        method_name: &str,
    ) -> Option<RuleMatch<ExplicitRule>> {
        let snapshot = self.snapshot();
        resolve_in_hierarchy(ancestry, |type_name| {
            snapshot.rule_for(type_name, method_name).cloned()
        })
    }

    /// Effective concrete-only setting for one (type, operation):
    /// method-level flag if set, else the first flagged rule on the
    /// same type in document order, else the global default, else
    /// false.
    pub fn concrete_only_effective(&self, type_name: &str, method_name: &str) -> bool {
        let snapshot = self.snapshot();
        if let Some(rule) = snapshot.rule_for(type_name, method_name) {
            if let Some(flag) = rule.concrete_only {
                return flag;
            }
        }
        let class_level = snapshot
            .rule_set()
            .instrumentations
            .iter()
            .filter(|r| r.class_name == type_name)
            .find_map(|r| r.concrete_only);
        if let Some(flag) = class_level {
            return flag;
        }
        snapshot.rule_set().concrete_only.unwrap_or(false)
    }

    // ── Introspection ───────────────────────────────────────────

    /// Path of the rule document this manager loads from.
    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    /// Number of explicit rules in the active snapshot.
    pub fn rule_count(&self) -> usize {
        self.snapshot().rule_count()
    }

    /// Number of distinct type names with at least one explicit rule.
    pub fn intercepted_type_count(&self) -> usize {
        self.snapshot().type_count()
    }
}
