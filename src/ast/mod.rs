//! AST Module - the declarative workflow document
//!
//! - `types`: Type System (type strings → `TypeDescriptor` → `NativeType`)
//! - `workflow`: `WorkflowConfig`, `StepConfig`, `EdgeConfig`, settings
//! - `resolve`: named-type resolution with cycle detection
//! - `schema_validator`: embedded JSON-Schema structural check
//!
//! These types are the static structure parsed from YAML/JSON.
//! For execution, see the `runtime` module.

pub mod resolve;
pub mod schema_validator;
pub mod types;
mod workflow;

pub use resolve::TypeResolver;
pub use types::{
    parse_type, parse_type_in, to_native_type, NativeField, NativeType, NoNamedTypes,
    ObjectField, ScalarKind, TypeDescriptor, TypeEnv, TypeParseError,
};
pub use workflow::{
    EdgeConfig, ExecutionSettings, FieldDecl, FieldMap, FlowMeta, GlobalConfig, LlmSettings,
    ObservabilitySettings, OrderedMap, OutputSchemaDecl, SinkKind, StateDecl, StepConfig,
    WorkflowConfig, SCHEMA_VERSION,
};
