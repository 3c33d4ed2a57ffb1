//! Name resolution and type checking, between the parser and the translator.

pub mod sema;
pub mod symtab;

pub use sema::{analyze, Analyzer, SemaError};
pub use symtab::{Scope, Symbol, SymbolKind};
