//! Call-graph extraction from a Lua syntax tree.
//!
//! Walks the tree depth-first, keeping a [`ScopeStack`] of enclosing named
//! functions. Every literal call expression is attributed to the innermost
//! scope (or [`ScopeTag::Global`]) and collected into a [`CallGraphEntry`].
//! String arguments of `require` calls are collected separately; the linker
//! uses them to tell module aliases from local module tables.

use std::borrow::Cow;
use thiserror::Error;
use tree_sitter::Node;

use super::parser::{LuaParser, ParseError, SyntaxKind, SyntaxTree};
use super::scope::ScopeStack;
use crate::types::{CallGraphEntry, FileStatus, RequireList, ScopeTag};

/// Deepest syntax-tree nesting walked before giving up on a file.
///
/// Long right-associative `..` chains and method-call chains nest one level
/// per operand, so this sits well above hand-written code.
pub const MAX_AST_DEPTH: usize = 10_000;

/// Stack size for threads that run [`CallGraphExtractor`]. The walk recurses
/// once per tree level, up to [`MAX_AST_DEPTH`].
pub const EXTRACT_STACK_SIZE: usize = 32 * 1024 * 1024;

const REQUIRE: &str = "require";

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("syntax error near line {line}")]
    Syntax { line: usize },

    #[error("malformed syntax tree at line {line}: {reason}")]
    Structural { line: usize, reason: String },

    #[error("nesting deeper than {MAX_AST_DEPTH} levels at line {line}")]
    TooDeep { line: usize },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl ExtractError {
    pub fn status(&self) -> FileStatus {
        match self {
            Self::Syntax { .. } => FileStatus::SyntaxError,
            Self::Structural { .. } | Self::TooDeep { .. } | Self::Parse(_) => {
                FileStatus::ExtractionError
            }
        }
    }

    fn structural(node: &Node, reason: impl Into<String>) -> Self {
        Self::Structural {
            line: line_of(node),
            reason: reason.into(),
        }
    }
}

/// Everything extracted from one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    pub entry: CallGraphEntry,
    pub requires: RequireList,
}

/// Parser plus extraction settings. One per worker thread.
pub struct CallGraphExtractor {
    parser: LuaParser,
    strict_syntax: bool,
}

impl CallGraphExtractor {
    pub fn new(strict_syntax: bool) -> Result<Self, ExtractError> {
        Ok(Self {
            parser: LuaParser::new()?,
            strict_syntax,
        })
    }

    /// Parse `source` and extract its call graph.
    ///
    /// In strict mode a tree containing recovered parse errors is rejected as
    /// a syntax error instead of being walked.
    pub fn extract_source(&mut self, source: &str) -> Result<Extraction, ExtractError> {
        let tree = self.parser.parse(source)?;
        if self.strict_syntax && tree.has_errors() {
            let line = tree.first_error_line().unwrap_or(1);
            return Err(ExtractError::Syntax { line });
        }
        extract(source, &tree)
    }
}

/// Extract the call graph of an already parsed chunk.
///
/// `source` must be the exact text `tree` was parsed from.
pub fn extract(source: &str, tree: &SyntaxTree) -> Result<Extraction, ExtractError> {
    let mut scopes = ScopeStack::new();
    let extraction = collect(source, tree, &mut scopes)?;
    debug_assert!(scopes.is_empty(), "scope stack not balanced after walk");
    Ok(extraction)
}

fn collect(
    source: &str,
    tree: &SyntaxTree,
    scopes: &mut ScopeStack,
) -> Result<Extraction, ExtractError> {
    let mut collector = CallCollector {
        source,
        entry: CallGraphEntry::new(),
        requires: RequireList::new(),
    };
    collector.walk(tree.root(), scopes, 0)?;

    Ok(Extraction {
        entry: collector.entry,
        requires: collector.requires,
    })
}

struct CallCollector<'s> {
    source: &'s str,
    entry: CallGraphEntry,
    requires: RequireList,
}

impl<'s> CallCollector<'s> {
    fn walk(
        &mut self,
        node: Node,
        scopes: &mut ScopeStack,
        depth: usize,
    ) -> Result<(), ExtractError> {
        if depth > MAX_AST_DEPTH {
            return Err(ExtractError::TooDeep {
                line: line_of(&node),
            });
        }

        match SyntaxKind::of(&node) {
            SyntaxKind::FunctionDeclaration => {
                let tag = self.declaration_scope(node)?;
                let mut scope = scopes.enter(tag);
                self.walk_children(node, &mut scope, depth)
            }
            SyntaxKind::FunctionCall => {
                self.record_call(node, scopes)?;
                self.walk_children(node, scopes, depth)
            }
            SyntaxKind::String | SyntaxKind::Comment => Ok(()),
            SyntaxKind::FunctionDefinition
            | SyntaxKind::Identifier
            | SyntaxKind::DotIndex
            | SyntaxKind::BracketIndex
            | SyntaxKind::MethodIndex
            | SyntaxKind::Parenthesized
            | SyntaxKind::Arguments
            | SyntaxKind::LocalKeyword
            | SyntaxKind::Error
            | SyntaxKind::Other => self.walk_children(node, scopes, depth),
        }
    }

    fn walk_children(
        &mut self,
        node: Node,
        scopes: &mut ScopeStack,
        depth: usize,
    ) -> Result<(), ExtractError> {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            self.walk(child, scopes, depth + 1)?;
        }
        Ok(())
    }

    /// Scope pushed for a function declaration.
    fn declaration_scope(&self, node: Node) -> Result<ScopeTag, ExtractError> {
        let name = node
            .child_by_field_name("name")
            .ok_or_else(|| ExtractError::structural(&node, "function declaration without name"))?;

        let mut segments = Vec::new();
        self.name_segments(name, &mut segments)?;
        let dotted = segments.join(".");

        let mut cursor = node.walk();
        let is_local = node
            .children(&mut cursor)
            .any(|child| SyntaxKind::of(&child) == SyntaxKind::LocalKeyword);

        Ok(if is_local {
            ScopeTag::Local(dotted)
        } else {
            ScopeTag::Exported(dotted)
        })
    }

    /// Flatten `a.b.c` / `a.b:c` into `["a", "b", "c"]`.
    fn name_segments(&self, node: Node, segments: &mut Vec<&'s str>) -> Result<(), ExtractError> {
        match SyntaxKind::of(&node) {
            SyntaxKind::Identifier => {
                segments.push(self.text(&node)?);
                Ok(())
            }
            SyntaxKind::DotIndex | SyntaxKind::MethodIndex => {
                let member_field = if SyntaxKind::of(&node) == SyntaxKind::DotIndex {
                    "field"
                } else {
                    "method"
                };
                let table = node
                    .child_by_field_name("table")
                    .ok_or_else(|| ExtractError::structural(&node, "index without table"))?;
                let member = node
                    .child_by_field_name(member_field)
                    .ok_or_else(|| ExtractError::structural(&node, "index without member"))?;
                self.name_segments(table, segments)?;
                segments.push(self.text(&member)?);
                Ok(())
            }
            SyntaxKind::FunctionDeclaration
            | SyntaxKind::FunctionDefinition
            | SyntaxKind::FunctionCall
            | SyntaxKind::BracketIndex
            | SyntaxKind::Parenthesized
            | SyntaxKind::String
            | SyntaxKind::Arguments
            | SyntaxKind::Comment
            | SyntaxKind::LocalKeyword
            | SyntaxKind::Error
            | SyntaxKind::Other => Err(ExtractError::structural(
                &node,
                format!("unexpected `{}` in function name", node.kind()),
            )),
        }
    }

    fn record_call(&mut self, node: Node, scopes: &ScopeStack) -> Result<(), ExtractError> {
        let target = node
            .child_by_field_name("name")
            .ok_or_else(|| ExtractError::structural(&node, "call without callee"))?;

        let callee = match SyntaxKind::of(&target) {
            // Index targets keep their exact source spelling: `a.b`, `t["k"]`, `obj:m`
            SyntaxKind::Identifier
            | SyntaxKind::DotIndex
            | SyntaxKind::BracketIndex
            | SyntaxKind::MethodIndex => self.text(&target)?,
            SyntaxKind::FunctionDeclaration
            | SyntaxKind::FunctionDefinition
            | SyntaxKind::FunctionCall
            | SyntaxKind::Parenthesized
            | SyntaxKind::String
            | SyntaxKind::Arguments
            | SyntaxKind::Comment
            | SyntaxKind::LocalKeyword
            | SyntaxKind::Error
            | SyntaxKind::Other => {
                tracing::trace!(
                    target: "extract",
                    "dropping call on `{}` at line {}",
                    target.kind(),
                    line_of(&node)
                );
                return Ok(());
            }
        };

        if callee == REQUIRE {
            if let Some(module) = self.first_string_argument(node)? {
                self.requires.push(module.into_owned());
            }
        }

        self.entry.record(scopes.current(), callee);
        Ok(())
    }

    fn first_string_argument(&self, call: Node) -> Result<Option<Cow<'s, str>>, ExtractError> {
        let Some(arguments) = call.child_by_field_name("arguments") else {
            return Ok(None);
        };

        // `require "mod"` parses with the string as the argument node itself
        if SyntaxKind::of(&arguments) == SyntaxKind::String {
            return self.string_value(arguments).map(Some);
        }

        let mut cursor = arguments.walk();
        let first = arguments
            .named_children(&mut cursor)
            .find(|child| SyntaxKind::of(child) != SyntaxKind::Comment);

        match first {
            Some(arg) if SyntaxKind::of(&arg) == SyntaxKind::String => {
                self.string_value(arg).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Value of a string literal: delimiters dropped, escapes decoded.
    fn string_value(&self, string: Node) -> Result<Cow<'s, str>, ExtractError> {
        // `""` and `[[]]` have no content node
        let Some(content) = string.child_by_field_name("content") else {
            return Ok(Cow::Borrowed(""));
        };
        let raw = self.text(&content)?;

        let mut cursor = content.walk();
        let escapes: Vec<Node> = content
            .named_children(&mut cursor)
            .filter(|child| child.kind() == "escape_sequence")
            .collect();
        if escapes.is_empty() {
            return Ok(Cow::Borrowed(raw));
        }

        let base = content.start_byte();
        let mut value = String::with_capacity(raw.len());
        let mut last = 0;
        for escape in escapes {
            let range = escape.byte_range();
            value.push_str(raw.get(last..range.start - base).unwrap_or_default());
            unescape_into(self.text(&escape)?, &mut value);
            last = range.end - base;
        }
        value.push_str(raw.get(last..).unwrap_or_default());
        Ok(Cow::Owned(value))
    }

    fn text(&self, node: &Node) -> Result<&'s str, ExtractError> {
        self.source
            .get(node.byte_range())
            .ok_or_else(|| ExtractError::structural(node, "byte range outside source"))
    }
}

fn line_of(node: &Node) -> usize {
    node.start_position().row + 1
}

/// Append the character an escape sequence such as `\n`, `\65` or `\x41`
/// stands for. Byte escapes outside ASCII are kept verbatim.
fn unescape_into(escape: &str, out: &mut String) {
    let Some(body) = escape.strip_prefix('\\') else {
        out.push_str(escape);
        return;
    };

    let decoded = match body.chars().next() {
        Some('n' | '\n') => Some('\n'),
        Some('t') => Some('\t'),
        Some('r') => Some('\r'),
        Some('a') => Some('\x07'),
        Some('b') => Some('\x08'),
        Some('f') => Some('\x0c'),
        Some('v') => Some('\x0b'),
        Some(c @ ('\\' | '"' | '\'')) => Some(c),
        // `\z` swallows the whitespace that follows it
        Some('z') => return,
        Some('x') => u8::from_str_radix(&body[1..], 16)
            .ok()
            .filter(u8::is_ascii)
            .map(char::from),
        Some('u') => body
            .strip_prefix("u{")
            .and_then(|hex| hex.strip_suffix('}'))
            .and_then(|hex| u32::from_str_radix(hex, 16).ok())
            .and_then(char::from_u32),
        Some(c) if c.is_ascii_digit() => {
            body.parse::<u8>().ok().filter(u8::is_ascii).map(char::from)
        }
        _ => None,
    };

    match decoded {
        Some(c) => out.push(c),
        None => out.push_str(escape),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::thread;

    /// Run `f` on a thread sized like the scan workers.
    fn on_extract_stack<T: Send>(f: impl FnOnce() -> T + Send) -> T {
        thread::scope(|s| {
            thread::Builder::new()
                .stack_size(EXTRACT_STACK_SIZE)
                .spawn_scoped(s, f)
                .unwrap()
                .join()
                .unwrap()
        })
    }

    fn try_run(code: &str) -> Result<Extraction, ExtractError> {
        on_extract_stack(|| CallGraphExtractor::new(true).unwrap().extract_source(code))
    }

    fn run(code: &str) -> Extraction {
        try_run(code).unwrap()
    }

    fn callees(extraction: &Extraction, scope: ScopeTag) -> BTreeSet<String> {
        extraction
            .entry
            .callees(&scope)
            .cloned()
            .unwrap_or_default()
    }

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_local_and_exported_scopes() {
        let code = r#"
local function foo()
    bar()
end

function M.baz()
    foo()
end
"#;
        let extraction = run(code);

        assert_eq!(extraction.entry.scope_count(), 2);
        assert_eq!(callees(&extraction, ScopeTag::local("foo")), set(&["bar"]));
        assert_eq!(
            callees(&extraction, ScopeTag::exported("M.baz")),
            set(&["foo"])
        );
        assert!(extraction.requires.is_empty());
    }

    #[test]
    fn test_top_level_calls_are_global() {
        let extraction = run("print('a')\nos.execute('ls')\n");
        assert_eq!(
            callees(&extraction, ScopeTag::Global),
            set(&["print", "os.execute"])
        );
    }

    #[test]
    fn test_callees_are_deduplicated() {
        let code = r#"
function run()
    log("a")
    log("b")
    log("c")
end
"#;
        let extraction = run(code);
        assert_eq!(callees(&extraction, ScopeTag::exported("run")), set(&["log"]));
        assert_eq!(extraction.entry.call_count(), 1);
    }

    #[test]
    fn test_index_targets_keep_source_spelling() {
        let code = r#"
a.b.c()
t["key"](1)
obj:method()
"#;
        let extraction = run(code);
        assert_eq!(
            callees(&extraction, ScopeTag::Global),
            set(&["a.b.c", "t[\"key\"]", "obj:method"])
        );
    }

    #[test]
    fn test_unresolvable_targets_are_dropped() {
        let code = r#"
(get_handler())(1)
make()()
"#;
        let extraction = run(code);
        // Only the inner, named calls survive
        assert_eq!(
            callees(&extraction, ScopeTag::Global),
            set(&["get_handler", "make"])
        );
    }

    #[test]
    fn test_require_arguments_are_collected() {
        let code = r#"
local json = require("cjson")
local util = require 'myapp.util'
require "plain"
require(name)
"#;
        let extraction = run(code);
        assert_eq!(extraction.requires, vec!["cjson", "myapp.util", "plain"]);
        assert_eq!(callees(&extraction, ScopeTag::Global), set(&["require"]));
    }

    #[test]
    fn test_long_bracket_require() {
        let extraction = run("require [[legacy.mod]]\n");
        assert_eq!(extraction.requires, vec!["legacy.mod"]);
    }

    #[test]
    fn test_nested_functions_restore_outer_scope() {
        let code = r#"
function outer()
    local function inner()
        x()
    end
    y()
end
z()
"#;
        let extraction = run(code);
        assert_eq!(callees(&extraction, ScopeTag::exported("outer")), set(&["y"]));
        assert_eq!(callees(&extraction, ScopeTag::local("inner")), set(&["x"]));
        assert_eq!(callees(&extraction, ScopeTag::Global), set(&["z"]));
    }

    #[test]
    fn test_method_declaration_is_exported_dotted() {
        let code = r#"
function Account:deposit(v)
    self:validate(v)
end
"#;
        let extraction = run(code);
        assert_eq!(
            callees(&extraction, ScopeTag::exported("Account.deposit")),
            set(&["self:validate"])
        );
    }

    #[test]
    fn test_anonymous_functions_use_enclosing_scope() {
        let code = r#"
local handler = function()
    dispatch()
end

function M.setup()
    register(function() inner_cb() end)
end
"#;
        let extraction = run(code);
        assert_eq!(callees(&extraction, ScopeTag::Global), set(&["dispatch"]));
        assert_eq!(
            callees(&extraction, ScopeTag::exported("M.setup")),
            set(&["register", "inner_cb"])
        );
    }

    #[test]
    fn test_function_without_calls_has_no_entry() {
        let extraction = run("local function idle() return 1 end\n");
        assert!(extraction.entry.is_empty());
    }

    #[test]
    fn test_strict_mode_rejects_broken_chunk() {
        let mut extractor = CallGraphExtractor::new(true).unwrap();
        let err = extractor
            .extract_source("function broken(\n  print('x')\n")
            .unwrap_err();
        assert_eq!(err.status(), FileStatus::SyntaxError);
    }

    #[test]
    fn test_lenient_mode_walks_recovered_tree() {
        let mut extractor = CallGraphExtractor::new(false).unwrap();
        let extraction = extractor
            .extract_source("print('ok')\nlocal = = 3\n")
            .unwrap();
        assert!(callees(&extraction, ScopeTag::Global).contains("print"));
    }

    #[test]
    fn test_scope_stack_balanced_after_walk() {
        let code = r#"
function a() local function b() function c.d() e() end end end
"#;
        let mut parser = LuaParser::new().unwrap();
        let tree = parser.parse(code).unwrap();
        let mut scopes = ScopeStack::new();

        collect(code, &tree, &mut scopes).unwrap();

        assert!(scopes.is_empty());
        assert_eq!(scopes.pushes(), 3);
        assert_eq!(scopes.pops(), 3);
    }

    #[test]
    fn test_scope_stack_balanced_after_error() {
        let depth = MAX_AST_DEPTH + 50;
        let code = format!(
            "function deep()\n  x = {}1{}\nend\n",
            "(".repeat(depth),
            ")".repeat(depth)
        );
        let (err, scopes) = on_extract_stack(|| {
            let mut parser = LuaParser::new().unwrap();
            let tree = parser.parse(&code).unwrap();
            let mut scopes = ScopeStack::new();
            let err = collect(&code, &tree, &mut scopes).unwrap_err();
            (err, scopes)
        });

        assert!(matches!(err, ExtractError::TooDeep { .. }));
        assert_eq!(err.status(), FileStatus::ExtractionError);
        assert!(scopes.is_empty());
        assert_eq!(scopes.pushes(), scopes.pops());
    }

    #[test]
    fn test_deeply_nested_syntax_error_is_reported() {
        let depth = 50_000;
        let code = format!("x = {}1 +{}\n", "(".repeat(depth), ")".repeat(depth));

        let err = try_run(&code).unwrap_err();

        assert!(matches!(err, ExtractError::Syntax { line: 1 }));
        assert_eq!(err.status(), FileStatus::SyntaxError);
    }

    #[test]
    fn test_long_concatenation_chain_is_walked() {
        let chain = vec!["part"; 2000].join(" .. ");
        let code = format!("local s = {chain}\nprint(s)\n");

        let extraction = run(&code);

        assert_eq!(callees(&extraction, ScopeTag::Global), set(&["print"]));
    }

    #[test]
    fn test_long_method_chain_is_walked() {
        let chain: String = (0..600).map(|i| format!(":m{i}()")).collect();
        let code = format!("function M.build() builder{chain} end\n");

        let extraction = run(&code);
        let called = callees(&extraction, ScopeTag::exported("M.build"));

        assert_eq!(called.len(), 600);
        assert!(called.contains("builder:m0"));
    }

    #[test]
    fn test_require_string_escapes_are_decoded() {
        let code = r#"
require("a\"b")
require 'dir\\mod'
require("\x6c\117\u{61}.x")
require [==[raw\n]==]
require ""
"#;
        let extraction = run(code);
        assert_eq!(
            extraction.requires,
            vec!["a\"b", "dir\\mod", "lua.x", "raw\\n", ""]
        );
    }

    #[test]
    fn test_unescape_keeps_undecodable_sequences() {
        let mut out = String::new();
        for escape in ["\\q", "\\200", "\\z  ", "\\t", "\\u{41}"] {
            unescape_into(escape, &mut out);
        }
        assert_eq!(out, "\\q\\200\tA");
    }
}
