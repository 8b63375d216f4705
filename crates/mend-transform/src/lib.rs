//! Mend Transform Library
//!
//! Conservative source-to-source transforms. Each transform takes source text
//! plus an [`mend_plan::Operation`] and either produces a complete candidate
//! text (validated by re-parse before it is returned) or a structured
//! failure; no transform ever partially mutates its input.
//!
//! # Core Concepts
//!
//! - [`Transform`]: the `(source, locator, params) -> new source | failure`
//!   contract, one implementation per [`mend_plan::OperationKind`]
//! - [`free_set`]: the shared safety gate; names a candidate region reads
//!   but does not bind must be explained by extra parameters, module bindings
//!   or builtins, or the transform is rejected
//! - [`TransformRegistry`]: kind-to-transform dispatch for the executor
//! - Fallback chains ([`SplitModule`]'s three tiers) are ordered strategy
//!   lists, tried until one produces a result

#![warn(unreachable_pub)]

mod context;
mod error;
mod extract_class;
mod extract_function;
mod facade;
pub mod free_set;
mod note;
mod registry;
mod remove_import;
mod split_module;
mod transform;

pub use context::TransformContext;
pub use error::TransformError;
pub use extract_class::ExtractClass;
pub use extract_function::{ExtractBlockToHelper, ExtractNestedFunction};
pub use facade::IntroduceFacade;
pub use note::{AppendTodoNote, ReplaceFileContent};
pub use registry::TransformRegistry;
pub use remove_import::{RemoveModuleImport, RemoveUnusedImports};
pub use split_module::SplitModule;
pub use transform::{CompanionFile, Transform, TransformOutcome};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
