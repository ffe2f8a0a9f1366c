//! Utilities Module - shared infrastructure
//!
//! - `constants`: Centralized timeouts and limits
//! - `ident`: Identifier validation for step ids and field names
//! - `suggest`: Edit-distance "did you mean" helpers

pub mod constants;
pub mod ident;
pub mod suggest;

pub use constants::{
    CONNECT_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_STEP_TIMEOUT, MAX_TOOL_ROUNDS,
    SUGGESTION_DISTANCE,
};
pub use ident::{is_reserved, is_valid_identifier, END, START};
pub use suggest::{closest_match, edit_distance, find_suggestions};
