//! Source parsing.
//!
//! Lua is the only language handled; the grammar itself is provided by
//! tree-sitter-lua and treated as a black box producing syntax trees.

pub mod lua;

pub use lua::{
    CallGraphExtractor, EXTRACT_STACK_SIZE, ExtractError, Extraction, LuaParser, SyntaxKind,
};
