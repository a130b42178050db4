//! # Schema Inference Module
//!
//! Derives a structural schema (dot-notation paths, types, nullability,
//! nesting) from observed rows instead of a predeclared schema. Pure and
//! synchronous: no transport, no I/O, only the accumulator it returns.
//!
//! Type assignment is *sticky*: the first type seen for a path is kept for
//! good. Rows whose early samples disagree with later ones are not
//! reclassified; the disagreement is surfaced through
//! [`TypeConfidence`] instead.

/// Schema node types.
pub mod field_info;
/// The inference walk.
pub mod inference;

pub use field_info::{FieldInfo, FieldMap, FieldType, TypeConfidence};
pub use inference::{flatten_fields, infer_fields, infer_type, is_date_string, merge_fields};
