//! Management entry point: orchestrates the reload pipeline.
//!
//! A reload is driven end to end from here: snapshot the registry's
//! checksums, reload the configuration manager, repopulate the
//! registry from the new snapshot, diff old against new checksums, and
//! hand the affected type names to the weaver for selective
//! reapplication. Callers are expected to serialize concurrent reload
//! requests; this type does not queue them.

use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{error, info};

use dynaprobe_rules::ConfigManager;

use crate::diff::RuleDiff;
use crate::registry::RuleRegistry;

/// External interception mechanism (out of core scope).
///
/// `reapply` receives the distinct type names whose rules were added,
/// changed, or removed; the weaver is responsible for additionally
/// revisiting any live type whose hierarchy includes one of them, and
/// must treat a missing registry rule at call time as "skip attribute
/// extraction for this one call".
pub trait Weaver: Send + Sync {
    fn reapply(&self, affected_types: &BTreeSet<String>);
}

type DebugHook = Box<dyn Fn(bool) + Send + Sync>;

/// Runtime management facade consumed by an external transport.
pub struct Management {
    manager: Arc<ConfigManager>,
    registry: Arc<RuleRegistry>,
    weaver: Arc<dyn Weaver>,
    debug_enabled: AtomicBool,
    debug_hook: Mutex<Option<DebugHook>>,
}

impl Management {
    pub fn new(
        manager: Arc<ConfigManager>,
        registry: Arc<RuleRegistry>,
        weaver: Arc<dyn Weaver>,
    ) -> Self {
        Self {
            manager,
            registry,
            weaver,
            debug_enabled: AtomicBool::new(false),
            debug_hook: Mutex::new(None),
        }
    }

    /// Install the sink for the debug toggle, e.g. a log filter reload
    /// handle. Replaces any previously installed hook.
    pub fn set_debug_hook(&self, hook: impl Fn(bool) + Send + Sync + 'static) {
        *self.debug_hook.lock().expect("debug hook lock poisoned") = Some(Box::new(hook));
    }

    /// Reload the rule document and reapply interception only where
    /// rule content actually changed.
    ///
    /// Never panics outward; returns false only if the reload pipeline
    /// itself failed unrecoverably. There is no automatic retry; the
    /// next trigger is the retry path.
    pub fn reload_configuration(&self) -> bool {
        info!("configuration reload requested");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.run_reload()));
        match outcome {
            Ok(()) => true,
            Err(_) => {
                error!("configuration reload failed");
                false
            }
        }
    }

    fn run_reload(&self) {
        // 1. Snapshot current checksums before anything changes.
        let old_checksums = self.registry.snapshot_checksums();
        info!(entries = old_checksums.len(), "snapshot of existing rule checksums");

        // 2. Reload from the document source (degrades to empty on failure).
        self.manager.reload();

        // 3. Repopulate the registry from the new snapshot. Not
        //    transactional: a concurrent lookup inside this window may
        //    observe no rule for a key that is mid-reload.
        self.populate_registry();

        // 4. Diff and hand the affected type names to the weaver.
        let new_checksums = self.registry.snapshot_checksums();
        let diff = RuleDiff::compute(&old_checksums, &new_checksums);
        info!(
            added_or_changed = diff.added_or_changed().len(),
            removed = diff.removed().len(),
            unchanged = diff.unchanged().len(),
            "rule diff computed"
        );

        if !diff.has_changes() {
            info!("no rule changes detected, skipping reapplication");
            return;
        }

        let affected = diff.affected_types();
        info!(types = affected.len(), "requesting selective reapplication");
        self.weaver.reapply(&affected);
    }

    /// Clear the registry and re-register every explicit rule's
    /// argument and return attributes from the active snapshot.
    fn populate_registry(&self) {
        self.registry.clear();
        let snapshot = self.manager.snapshot();
        for rule in &snapshot.rule_set().instrumentations {
            self.registry
                .register(&rule.class_name, &rule.method_name, &rule.attributes);
            self.registry.register_return_rules(
                &rule.class_name,
                &rule.method_name,
                &rule.return_value_attributes,
            );
        }
        info!(entries = self.registry.len(), "rule registry repopulated");
    }

    // ── Query operations ────────────────────────────────────────

    /// Path of the rule document the manager loads from.
    pub fn config_source_path(&self) -> &Path {
        self.manager.source_path()
    }

    /// Number of explicit rules in the active configuration.
    pub fn rule_count(&self) -> usize {
        self.manager.rule_count()
    }

    /// Number of distinct type names with at least one explicit rule.
    pub fn intercepted_type_count(&self) -> usize {
        self.manager.intercepted_type_count()
    }

    /// Toggle debug-level logging. The stored flag answers
    /// `debug_enabled` queries; the installed hook applies the change
    /// to the active log gate.
    pub fn set_debug_enabled(&self, enabled: bool) {
        info!(enabled, "debug logging toggled");
        self.debug_enabled.store(enabled, Ordering::SeqCst);
        if let Some(hook) = self.debug_hook.lock().expect("debug hook lock poisoned").as_ref() {
            hook(enabled);
        }
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_enabled.load(Ordering::SeqCst)
    }
}
