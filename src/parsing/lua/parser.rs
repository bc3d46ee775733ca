//! Lua parser
//!
//! Thin wrapper over tree-sitter-lua. The grammar hands out node kinds as
//! strings; [`SyntaxKind`] folds the ones the extractor cares about into a
//! closed enum so callers match exhaustively instead of comparing strings.

use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Failed to set Lua language: {0}")]
    LanguageSetup(String),

    #[error("tree-sitter returned no tree")]
    NoTree,
}

/// Node kinds of the Lua grammar, as seen by call-graph extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyntaxKind {
    /// `function name() end` and `local function name() end`.
    FunctionDeclaration,
    /// Anonymous `function() end` expressions.
    FunctionDefinition,
    FunctionCall,
    Identifier,
    /// `a.b`
    DotIndex,
    /// `a[b]`
    BracketIndex,
    /// `a:b`
    MethodIndex,
    Parenthesized,
    String,
    Arguments,
    Comment,
    /// Local keyword token inside a declaration.
    LocalKeyword,
    /// Error or missing node inserted by tree-sitter recovery.
    Error,
    /// Anything the extractor only descends through.
    Other,
}

impl SyntaxKind {
    pub fn of(node: &Node) -> Self {
        if node.is_error() || node.is_missing() {
            return Self::Error;
        }
        Self::from_kind(node.kind())
    }

    pub fn from_kind(kind: &str) -> Self {
        match kind {
            "function_declaration" => Self::FunctionDeclaration,
            "function_definition" => Self::FunctionDefinition,
            "function_call" => Self::FunctionCall,
            "identifier" => Self::Identifier,
            "dot_index_expression" => Self::DotIndex,
            "bracket_index_expression" => Self::BracketIndex,
            "method_index_expression" => Self::MethodIndex,
            "parenthesized_expression" => Self::Parenthesized,
            "string" => Self::String,
            "arguments" => Self::Arguments,
            "comment" => Self::Comment,
            "local" => Self::LocalKeyword,
            "ERROR" => Self::Error,
            _ => Self::Other,
        }
    }
}

/// A parsed Lua chunk.
pub struct SyntaxTree {
    tree: Tree,
}

impl SyntaxTree {
    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    /// True if tree-sitter had to recover from errors anywhere in the chunk.
    pub fn has_errors(&self) -> bool {
        self.tree.root_node().has_error()
    }

    /// Line (1-based) of the first error or missing node, if any.
    pub fn first_error_line(&self) -> Option<usize> {
        first_error(self.tree.root_node()).map(|node| node.start_position().row + 1)
    }
}

/// Follows the leftmost erroneous child down to the error itself. Iterative,
/// since recovered trees can be nested far deeper than any thread's stack.
fn first_error(root: Node<'_>) -> Option<Node<'_>> {
    if !root.has_error() {
        return None;
    }
    let mut node = root;
    loop {
        if node.is_error() || node.is_missing() {
            return Some(node);
        }
        let mut cursor = node.walk();
        let next = node
            .children(&mut cursor)
            .find(|child| child.has_error() || child.is_missing());
        match next {
            Some(child) => node = child,
            None => return Some(node),
        }
    }
}

/// Lua language parser
pub struct LuaParser {
    parser: Parser,
}

impl LuaParser {
    /// Create a new Lua parser
    pub fn new() -> Result<Self, ParseError> {
        let mut parser = Parser::new();
        let lang = tree_sitter_lua::LANGUAGE;
        parser
            .set_language(&lang.into())
            .map_err(|e| ParseError::LanguageSetup(e.to_string()))?;

        Ok(Self { parser })
    }

    /// Parse decoded source text.
    ///
    /// Always parse the decoded string, never the raw bytes: byte offsets in the
    /// resulting tree are then valid slice boundaries into `code`.
    pub fn parse(&mut self, code: &str) -> Result<SyntaxTree, ParseError> {
        let tree = self.parser.parse(code, None).ok_or(ParseError::NoTree)?;
        Ok(SyntaxTree { tree })
    }
}
