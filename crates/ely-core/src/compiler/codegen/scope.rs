//! Scope and function-context management for variable resolution.

use crate::compiler::program::Program;

/// A local variable occupying a stack slot.
#[derive(Debug, Clone)]
pub struct Local {
    /// The variable name
    pub name: String,
    /// The scope depth where this was declared
    pub depth: usize,
    /// Whether a closure captures this local
    pub is_captured: bool,
}

/// A compile-time upvalue descriptor.
///
/// `is_local` true means `index` is a stack slot in the immediately
/// enclosing function; false means it is an upvalue index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpvalueRef {
    /// Slot or upvalue index in the enclosing function
    pub index: usize,
    /// Whether the index refers to an enclosing local
    pub is_local: bool,
}

/// Per-function compilation state.
///
/// Contexts form a chain through `parent`: the compiler pushes a fresh
/// context for each `function` body and pops it when the body ends.
/// Identifier resolution walks this chain, threading upvalue records
/// through every intermediate context.
#[derive(Debug, Default)]
pub struct FunctionCtx {
    /// Function name, if any (None for the top level and anonymous functions)
    pub name: Option<String>,
    /// Declared parameter count
    pub arity: usize,
    /// The code being emitted for this function
    pub program: Program,
    /// Locals in declaration order; the index is the stack slot
    pub locals: Vec<Local>,
    /// Captured upvalues, in the order their descriptors are emitted
    pub upvalues: Vec<UpvalueRef>,
    /// Current scope depth (0 = top level, 1 = function body)
    pub scope_depth: usize,
    /// The enclosing function's context
    pub parent: Option<Box<FunctionCtx>>,
}

impl FunctionCtx {
    /// Context for the top-level script.
    pub fn script() -> Self {
        Self::default()
    }

    /// Context for a function body. Slot 0 is reserved for the function
    /// itself so named functions can call themselves recursively.
    pub fn function(name: Option<String>) -> Self {
        Self {
            locals: vec![Local {
                name: name.clone().unwrap_or_default(),
                depth: 1,
                is_captured: false,
            }],
            name,
            scope_depth: 1,
            ..Self::default()
        }
    }

    /// Resolves a name to a local slot in this context, innermost first.
    /// When `capture` is set the local is marked captured.
    pub fn resolve_local(&mut self, name: &str, capture: bool) -> Option<usize> {
        for (slot, local) in self.locals.iter_mut().enumerate().rev() {
            if local.name == name {
                if capture {
                    local.is_captured = true;
                }
                return Some(slot);
            }
        }
        None
    }

    /// Resolves a name captured from an enclosing function, adding upvalue
    /// records to this context and every intermediate one.
    pub fn resolve_upvalue(&mut self, name: &str) -> Option<usize> {
        let slot = match self.parent.as_mut() {
            Some(parent) => parent.resolve_local(name, true),
            None => return None,
        };
        if let Some(slot) = slot {
            return Some(self.add_upvalue(slot, true));
        }

        let index = match self.parent.as_mut() {
            Some(parent) => parent.resolve_upvalue(name),
            None => return None,
        };
        index.map(|index| self.add_upvalue(index, false))
    }

    fn add_upvalue(&mut self, index: usize, is_local: bool) -> usize {
        let record = UpvalueRef { index, is_local };
        if let Some(existing) = self.upvalues.iter().position(|u| *u == record) {
            return existing;
        }
        self.upvalues.push(record);
        self.upvalues.len() - 1
    }
}
