//! Command session
//!
//! Owns the live document and the command registry. Queries and previews run
//! under a shared read guard; applying an edit or a feature takes the write
//! guard for the whole plan-apply-verify sequence so mutations never
//! interleave.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Value, json};

use crate::command::{Args, CommandRegistry, HELP, Handler, RELOAD_COMMANDS};
use crate::config::EngineConfig;
use crate::document::HostDocument;
use crate::error::{CommandFailure, CommandResult, EngineError};
use crate::mutator::{self, MutationOptions};

/// One response line
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidates: Option<Vec<String>>,
    pub data: Value,
}

impl Response {
    fn success(id: Option<Value>, data: Value) -> Self {
        Self {
            id,
            ok: true,
            error: None,
            error_kind: None,
            candidates: None,
            data,
        }
    }

    fn failure(id: Option<Value>, failure: CommandFailure) -> Self {
        let CommandFailure { error, data } = failure;
        Self {
            id,
            ok: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
            candidates: error.candidates().map(<[String]>::to_vec),
            data: data.unwrap_or_else(|| json!({})),
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Live document plus the commands that operate on it
pub struct Session {
    document: RwLock<Box<dyn HostDocument>>,
    registry: RwLock<CommandRegistry>,
    config: EngineConfig,
}

impl Session {
    pub fn new(document: impl HostDocument + 'static, config: EngineConfig) -> Self {
        Self {
            document: RwLock::new(Box::new(document)),
            registry: RwLock::new(CommandRegistry::builtin()),
            config,
        }
    }

    /// Register or replace a command
    pub fn register(&self, name: &'static str, handler: Handler) {
        self.registry.write().register(name, handler);
    }

    /// Run `f` against the document under a read guard
    pub fn with_document<R>(&self, f: impl FnOnce(&dyn HostDocument) -> R) -> R {
        let doc = self.document.read();
        f(&**doc)
    }

    /// Handle one raw request line and render the response line
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Value>(line) {
            Ok(request) => self.handle(&request),
            Err(e) => {
                tracing::warn!("Rejected malformed request: {}", e);
                let error = EngineError::InvalidInput(format!("Invalid JSON: {e}"));
                Response::failure(None, error.into())
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"ok":false,"error":"Failed to encode response: {e}","data":{{}}}}"#)
        })
    }

    /// Handle one request object
    pub fn handle(&self, request: &Value) -> Response {
        let id = request.get("id").filter(|v| !v.is_null()).cloned();
        if !request.is_object() {
            let error = EngineError::InvalidInput("Request must be a JSON object".into());
            return Response::failure(id, error.into());
        }
        let cmd = request.get("cmd").and_then(Value::as_str).unwrap_or_default();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(cmd, Args::new(request))))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload);
                tracing::warn!("Command {} panicked: {}", cmd, message);
                Err(EngineError::Internal(message).into())
            });

        match outcome {
            Ok(data) => Response::success(id, data),
            Err(failure) => {
                tracing::debug!("Command {} failed: {}", cmd, failure.error);
                Response::failure(id, failure)
            }
        }
    }

    fn dispatch(&self, cmd: &str, args: Args<'_>) -> CommandResult<Value> {
        if cmd.is_empty() {
            return Err(EngineError::InvalidInput("cmd is required".into()).into());
        }
        match cmd {
            HELP => return Ok(json!({ "commands": self.registry.read().names() })),
            RELOAD_COMMANDS => {
                let mut registry = self.registry.write();
                registry.reload();
                return Ok(json!({ "commands": registry.names() }));
            }
            _ => {}
        }

        let handler = self
            .registry
            .read()
            .get(cmd)
            .ok_or_else(|| EngineError::UnknownCommand(cmd.to_string()))?;
        args.require_mm_units()?;
        let preview = args.flag("preview", false);
        tracing::debug!("Dispatch {} ({:?}, preview: {})", cmd, handler, preview);

        match handler {
            Handler::Query(query) => Ok(query(&**self.document.read(), args)?),
            Handler::Edit(plan) => {
                if preview {
                    let doc = self.document.read();
                    Ok(plan(&**doc, args)?.preview_data())
                } else {
                    let mut doc = self.document.write();
                    let plan = plan(&**doc, args)?;
                    plan.apply(&mut **doc)
                }
            }
            Handler::Feature(plan) => {
                let options = MutationOptions {
                    compute: args
                        .opt_flag("compute")
                        .unwrap_or(self.config.compute_by_default),
                    tolerances: args.tolerances(self.config.verification)?,
                };
                if preview {
                    let doc = self.document.read();
                    let plan = plan(&**doc, args)?;
                    Ok(mutator::preview(&**doc, &plan).to_value())
                } else {
                    let mut doc = self.document.write();
                    let plan = plan(&**doc, args)?;
                    let report = mutator::run(&mut **doc, &plan, options)?;
                    Ok(report.to_value())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Fault, MemoryDocument};
    use crate::error::EngineResult;
    use glam::DVec3;

    fn block() -> MemoryDocument {
        let mut doc = MemoryDocument::new("Part");
        doc.add_box("Block", DVec3::ZERO, DVec3::new(4.0, 2.0, 1.0));
        doc
    }

    fn session() -> Session {
        Session::new(block(), EngineConfig::default())
    }

    fn feature_count(session: &Session) -> usize {
        session.with_document(|doc| doc.features().len())
    }

    #[test]
    fn test_help_lists_sorted_commands() {
        let response = session().handle(&json!({ "cmd": "help", "id": 7 }));
        assert!(response.ok);
        assert_eq!(response.id, Some(json!(7)));
        let commands = response.data["commands"].as_array().unwrap();
        let names: Vec<&str> = commands.iter().filter_map(Value::as_str).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"help"));
        assert!(names.contains(&"reload_commands"));
    }

    #[test]
    fn test_unknown_command() {
        let response = session().handle(&json!({ "cmd": "explode" }));
        assert!(!response.ok);
        assert_eq!(response.error.as_deref(), Some("Unknown command: explode"));
        assert_eq!(response.error_kind, Some("unknown_command"));
        assert!(response.id.is_none());
    }

    #[test]
    fn test_units_other_than_mm_are_rejected() {
        let response = session().handle(&json!({ "cmd": "status", "units": "cm" }));
        assert_eq!(
            response.error.as_deref(),
            Some("Unsupported units: cm. Only 'mm' is supported.")
        );
        assert_eq!(response.error_kind, Some("invalid_input"));
    }

    #[test]
    fn test_preview_leaves_document_untouched() {
        let session = session();
        let request = json!({ "cmd": "extrude_feature", "distance_mm": 5, "preview": true });
        let response = session.handle(&request);
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.data["preview"]["is_preview"], true);
        assert_eq!(response.data["apply"], Value::Null);
        assert!(response.data["measure_before"].is_object());
        assert_eq!(feature_count(&session), 0);
    }

    #[test]
    fn test_oversized_pattern_is_rejected_before_apply() {
        let session = session();
        let response = session.handle(&json!({
            "cmd": "pattern_feature",
            "pattern_type": "rectangular",
            "axis1": "X", "axis2": "Y",
            "count1": 100000, "count2": 100000,
            "spacing1_mm": 10, "spacing2_mm": 10,
        }));
        assert!(!response.ok);
        assert_eq!(response.error_kind, Some("invalid_input"));
        assert!(response.error.unwrap().contains("MAX_PATTERN_INSTANCES"));
        assert_eq!(feature_count(&session), 0);
    }

    #[test]
    fn test_apply_commits_feature() {
        let session = session();
        let response = session.handle(&json!({
            "cmd": "extrude_feature",
            "distance_mm": 5,
            "operation": "join",
        }));
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.data["apply"]["compute"]["ran"], true);
        assert!(response.data["apply"]["feature"]["name"].is_string());
        assert_eq!(response.data["verify"]["required_pass"], true);
        assert_eq!(feature_count(&session), 1);
    }

    #[test]
    fn test_compute_default_from_config() {
        let config = EngineConfig {
            compute_by_default: false,
            ..EngineConfig::default()
        };
        let session = Session::new(block(), config);
        let response = session.handle(&json!({ "cmd": "extrude_feature", "distance_mm": 5 }));
        assert!(response.ok, "{:?}", response.error);
        assert_eq!(response.data["apply"]["compute"]["ran"], false);
    }

    #[test]
    fn test_guardrail_violation_rolls_back() {
        let mut doc = block();
        doc.inject(Fault::ExtraFaces(200));
        let session = Session::new(doc, EngineConfig::default());
        let response = session.handle(&json!({
            "cmd": "extrude_feature",
            "distance_mm": 5,
            "operation": "join",
        }));
        assert!(!response.ok);
        assert_eq!(response.error_kind, Some("guardrail_violation"));
        assert_eq!(response.data["preview"]["plan"]["distance_mm"], 5.0);
        assert_eq!(feature_count(&session), 0);
    }

    #[test]
    fn test_body_candidates_in_response() {
        let mut doc = block();
        doc.add_box("Arm", DVec3::splat(10.0), DVec3::splat(11.0));
        let session = Session::new(doc, EngineConfig::default());
        let response = session.handle(&json!({ "cmd": "measure_bbox", "body_name": "Leg" }));
        assert_eq!(response.error_kind, Some("not_found"));
        assert_eq!(
            response.candidates,
            Some(vec!["Arm".to_string(), "Block".to_string()])
        );
    }

    #[test]
    fn test_edit_preview_then_apply() {
        let session = session();
        let preview = session.handle(&json!({ "cmd": "create_sketch", "plane": "XY", "preview": true }));
        assert!(preview.ok, "{:?}", preview.error);
        assert_eq!(preview.data["sketch"], Value::Null);
        let applied = session.handle(&json!({ "cmd": "create_sketch", "plane": "XY" }));
        assert!(applied.data["sketch"]["id"].is_string());
        assert_eq!(session.with_document(|doc| doc.sketches().len()), 1);
    }

    fn boom(_: &dyn HostDocument, _: Args<'_>) -> EngineResult<Value> {
        panic!("boom")
    }

    #[test]
    fn test_handler_panic_is_reported() {
        let session = session();
        session.register("boom", Handler::Query(boom));
        let response = session.handle(&json!({ "cmd": "boom" }));
        assert!(!response.ok);
        assert_eq!(response.error_kind, Some("internal"));
        assert_eq!(response.error.as_deref(), Some("Internal error: boom"));
        // the session keeps serving after a panic
        assert!(session.handle(&json!({ "cmd": "status" })).ok);
    }

    #[test]
    fn test_reload_drops_registered_commands() {
        let session = session();
        session.register("boom", Handler::Query(boom));
        let response = session.handle(&json!({ "cmd": "reload_commands" }));
        assert!(response.ok);
        let commands = response.data["commands"].as_array().unwrap();
        assert!(!commands.contains(&json!("boom")));
        assert!(commands.contains(&json!("status")));
    }

    #[test]
    fn test_handle_line() {
        let session = session();
        let line = session.handle_line("{not json");
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["ok"], false);
        assert_eq!(response["error_kind"], "invalid_input");
        assert!(response.get("id").is_none());

        let line = session.handle_line(r#"{"id": "a1", "cmd": "list_bodies"}"#);
        let response: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(response["id"], "a1");
        assert_eq!(response["ok"], true);
        assert_eq!(response["error"], Value::Null);
        assert_eq!(response["data"]["bodies"], json!(["Block"]));
    }
}
