//! Explicit stack of enclosing function scopes.
//!
//! Entering a scope returns a [`ScopeGuard`] that pops the frame when dropped,
//! so early returns and `?` inside a function body cannot leave stale frames.

use std::ops::{Deref, DerefMut};

use crate::types::ScopeTag;

#[derive(Debug, Default)]
pub struct ScopeStack {
    frames: Vec<ScopeTag>,
    pushes: usize,
    pops: usize,
}

impl ScopeStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push `tag`; the frame lives as long as the returned guard.
    pub fn enter(&mut self, tag: ScopeTag) -> ScopeGuard<'_> {
        self.frames.push(tag);
        self.pushes += 1;
        ScopeGuard { stack: self }
    }

    /// Innermost function scope, or [`ScopeTag::Global`] at top level.
    pub fn current(&self) -> ScopeTag {
        self.frames.last().cloned().unwrap_or(ScopeTag::Global)
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn pushes(&self) -> usize {
        self.pushes
    }

    pub fn pops(&self) -> usize {
        self.pops
    }

    fn pop(&mut self) {
        if self.frames.pop().is_some() {
            self.pops += 1;
        }
    }
}

/// Keeps one frame on the stack. Derefs to the stack for nested walks.
pub struct ScopeGuard<'a> {
    stack: &'a mut ScopeStack,
}

impl Deref for ScopeGuard<'_> {
    type Target = ScopeStack;

    fn deref(&self) -> &ScopeStack {
        self.stack
    }
}

impl DerefMut for ScopeGuard<'_> {
    fn deref_mut(&mut self) -> &mut ScopeStack {
        self.stack
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}
