//! Lua call-graph extraction
//!
//! - [`parser`]: tree-sitter integration and the closed [`SyntaxKind`] view of node kinds
//! - [`scope`]: explicit scope stack with RAII guards
//! - [`extractor`]: depth-first walk producing a [`CallGraphEntry`](crate::types::CallGraphEntry)
//!   and the file's `require` targets

pub mod extractor;
pub mod parser;
pub mod scope;

pub use extractor::{
    CallGraphExtractor, EXTRACT_STACK_SIZE, ExtractError, Extraction, MAX_AST_DEPTH, extract,
};
pub use parser::{LuaParser, ParseError, SyntaxKind, SyntaxTree};
pub use scope::{ScopeGuard, ScopeStack};
