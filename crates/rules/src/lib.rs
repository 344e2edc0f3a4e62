//! Declarative interception rule engine: configuration side.
//!
//! This crate provides:
//! - JSON rule document loading with serde deserialization
//! - Immutable config snapshots behind an atomically-swapped reference
//! - Hierarchy-aware match queries (type, interfaces, superclasses)
//! - Debounced hot-reload via the `notify` watcher

pub mod manager;
pub mod watcher;

pub use manager::{load_rule_set, ConfigManager, ConfigSnapshot, ListenerId};
pub use watcher::{ChangeWatcher, Debouncer, WatcherConfig};
