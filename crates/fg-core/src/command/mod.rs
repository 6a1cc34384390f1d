//! Command registry
//!
//! Every command is a plain function registered under its wire name. Read-only
//! queries produce response data directly; editing commands and feature
//! commands first produce a side-effect-free plan, which the session either
//! echoes (preview) or applies under exclusive access to the document.

mod args;
pub mod edit;
pub mod feature;
pub mod query;

use std::collections::BTreeMap;

use serde_json::Value;

use crate::document::HostDocument;
use crate::error::EngineResult;
use crate::feature::FeaturePlan;

pub use args::{Args, point_value};
pub use edit::{EditAction, EditPlan};

/// Read-only command producing response data
pub type QueryFn = fn(&dyn HostDocument, Args<'_>) -> EngineResult<Value>;

/// Planner of an unguarded document edit
pub type EditFn = fn(&dyn HostDocument, Args<'_>) -> EngineResult<EditPlan>;

/// Planner of a guarded feature mutation
pub type FeatureFn = fn(&dyn HostDocument, Args<'_>) -> EngineResult<FeaturePlan>;

/// How a registered command is run
#[derive(Clone, Copy)]
pub enum Handler {
    Query(QueryFn),
    Edit(EditFn),
    Feature(FeatureFn),
}

impl Handler {
    /// Whether running the command may change the document
    pub fn is_mutating(&self) -> bool {
        !matches!(self, Handler::Query(_))
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Handler::Query(_) => "Query",
            Handler::Edit(_) => "Edit",
            Handler::Feature(_) => "Feature",
        };
        f.write_str(kind)
    }
}

/// Names handled by the dispatcher itself
pub const HELP: &str = "help";
pub const RELOAD_COMMANDS: &str = "reload_commands";

/// Command name to handler table
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    handlers: BTreeMap<&'static str, Handler>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl CommandRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Registry with every built-in command
    pub fn builtin() -> Self {
        let mut registry = Self::new();

        // Queries
        registry.register("status", Handler::Query(query::status));
        registry.register("list_bodies", Handler::Query(query::list_bodies));
        registry.register("get_body_info", Handler::Query(query::get_body_info));
        registry.register("measure_bbox", Handler::Query(query::measure_bbox));
        registry.register("list_features", Handler::Query(query::list_features));
        registry.register("get_feature_info", Handler::Query(query::get_feature_info));
        registry.register("resolve_entity", Handler::Query(query::resolve_entity));
        registry.register("measure_face_span", Handler::Query(query::measure_face_span));

        // Edits
        registry.register("create_sketch", Handler::Edit(edit::create_sketch));
        registry.register("sketch_add_line", Handler::Edit(edit::sketch_add_line));
        registry.register("sketch_add_rectangle", Handler::Edit(edit::sketch_add_rectangle));
        registry.register("sketch_add_circle", Handler::Edit(edit::sketch_add_circle));
        registry.register("delete_feature", Handler::Edit(edit::delete_feature));

        // Guarded features
        registry.register("extrude_feature", Handler::Feature(feature::extrude_feature));
        registry.register("extrude_profile", Handler::Feature(feature::extrude_profile));
        registry.register("fillet_feature", Handler::Feature(feature::fillet_feature));
        registry.register("hole_feature", Handler::Feature(feature::hole_feature));
        registry.register("shell_feature", Handler::Feature(feature::shell_feature));
        registry.register("pattern_feature", Handler::Feature(feature::pattern_feature));
        registry.register("mirror_feature", Handler::Feature(feature::mirror_feature));
        registry.register("revolve_feature", Handler::Feature(feature::revolve_feature));

        registry
    }

    /// Register or replace a command
    pub fn register(&mut self, name: &'static str, handler: Handler) {
        if self.handlers.insert(name, handler).is_some() {
            tracing::debug!("Command {} replaced", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Rebuild the table from the built-in commands
    pub fn reload(&mut self) {
        *self = Self::builtin();
        tracing::info!("Loaded {} commands", self.handlers.len());
    }

    /// Sorted command names, including the dispatcher's own commands
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .handlers
            .keys()
            .copied()
            .chain([HELP, RELOAD_COMMANDS])
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_names_sorted_with_dispatcher_commands() {
        let names = CommandRegistry::builtin().names();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"help".to_string()));
        assert!(names.contains(&"reload_commands".to_string()));
        assert!(names.contains(&"extrude_feature".to_string()));
        assert_eq!(names.len(), CommandRegistry::builtin().len() + 2);
    }

    #[test]
    fn test_reload_restores_builtins() {
        let mut registry = CommandRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get("status").is_none());
        registry.reload();
        assert!(matches!(registry.get("status"), Some(Handler::Query(_))));
        assert!(registry.get("fillet_feature").unwrap().is_mutating());
        assert!(!registry.get("list_bodies").unwrap().is_mutating());
    }
}
