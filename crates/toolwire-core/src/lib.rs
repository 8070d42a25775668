//! Core types for toolwire.
//!
//! This crate provides the building blocks shared by every other layer:
//! - [`StructuredValue`], the schema-free JSON representation used for tool
//!   arguments and results
//! - [`ClientError`], the error taxonomy surfaced to callers
//! - Logging targets and helper macros on top of the [`log`] facade
//!
//! # Design Principles
//!
//! - No runtime reflection: payloads whose shape is not statically known are
//!   carried as [`StructuredValue`]
//! - All types support `Send + Sync`
//! - Errors are `Clone` so a single failure can be fanned out to every
//!   in-flight request

#![forbid(unsafe_code)]

mod error;
pub mod logging;
mod value;

pub use error::{ClientError, ClientResult};
pub use value::{Canonical, StructuredValue};
