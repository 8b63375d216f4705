//! Mend Syntax Layer
//!
//! The grammar-facing seam of the engine. Everything above this crate works
//! with names, byte ranges and text edits; only this crate touches tree-sitter
//! node kinds.
//!
//! # Core Concepts
//!
//! - [`ParsedModule`]: an owned source + syntax tree pair
//! - [`ScopeAnalysis`]: reads / writes / bound-names over byte-range regions,
//!   with [`PythonAnalysis`] as the concrete adapter
//! - [`TextEdit`] / [`EditSet`]: non-overlapping byte-range splices
//! - [`ImportStatement`] / [`TopLevelDef`]: the import and definition models
//!   the transforms consume

#![warn(unreachable_pub)]

mod analysis;
mod defs;
mod edit;
mod imports;
mod module;

pub use analysis::{ByteRange, PythonAnalysis, ScopeAnalysis};
pub use defs::{
    call_sites, candidate_blocks, dunder_all_names, find_class, find_function,
    module_docstring_range, nested_functions, top_level_defs, BlockInfo, CallSite, ClassInfo,
    DefKind, FunctionInfo, MethodInfo, TopLevelDef,
};
pub use edit::{dedent, indentation_of, reindent, EditError, EditSet, TextEdit};
pub use imports::{
    collect_imports, import_insertion_point, ImportItem, ImportKind, ImportStatement,
};
pub use module::{ParsedModule, SyntaxError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
