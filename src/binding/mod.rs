//! Binding Module - prompt templates against workflow state
//!
//! ```text
//! step.inputs (templates) ──resolve against state──▶ resolved inputs
//!                                                        │
//! step.prompt ──resolve (inputs first, then state)───────┴──▶ prompt text
//! ```

mod template;

pub use template::{
    extract_placeholders, resolve, tokenize, TemplateError, TemplateResolver, Token,
};
