//! featguard core
//!
//! Deterministic entity selection and guarded feature mutation for CAD hosts:
//! - Selectors: rank faces, edges and vertices by abstract criteria
//! - Measurement: bounding boxes, physical properties and face spans in mm
//! - Mutator: apply a feature plan, check guardrails, verify or roll back
//! - Session: command registry and dispatch over a shared document

pub mod command;
pub mod config;
pub mod constants;
pub mod document;
pub mod entity;
pub mod error;
pub mod feature;
pub mod geometry;
pub mod guardrail;
pub mod measure;
pub mod mutator;
pub mod retry;
pub mod selector;
pub mod session;
pub mod units;
pub mod verify;

pub use command::{CommandRegistry, Handler};
pub use config::{ConfigError, EngineConfig};
pub use document::{HostDocument, HostError, MemoryDocument};
pub use error::{CommandFailure, CommandResult, EngineError, EngineResult};
pub use feature::{BooleanOp, FeatureOp, FeaturePlan, OperationKind};
pub use mutator::{MutationOptions, MutationReport};
pub use retry::RetryPolicy;
pub use session::{Response, Session};
pub use units::{LengthUnit, PointMm, UnitScale};
pub use verify::Tolerances;
