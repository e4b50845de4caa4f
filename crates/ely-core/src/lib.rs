// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # ely-core
//!
//! The core of the Ely scripting language, implemented in Rust.
//!
//! ## Overview
//!
//! This crate provides a complete Ely execution environment:
//! - Lexer producing a lazy token stream
//! - Single-pass Pratt compiler emitting a linear instruction stream
//! - Stack-based virtual machine with closures and upvalue capture
//! - The built-in runtime library (`print`, `read_line`, `str`, `len`)
//!
//! ## Quick Start
//!
//! ```rust
//! use ely_core::{Engine, Value};
//!
//! let mut engine = Engine::new();
//! let result = engine.eval("1 + 2").unwrap();
//! assert_eq!(result, Value::Number(3.0));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builtins;
pub mod compiler;
pub mod disasm;
pub mod error;
pub mod lexer;
pub mod runtime;
pub mod vm;

// Re-exports for convenience
pub use compiler::{Compiler, Program};
pub use error::{Error, Result};
pub use runtime::value::Value;
pub use vm::Vm;

use tracing::debug;

/// The main Ely engine instance.
///
/// Wraps a [`Vm`] whose globals persist across evaluations, so successive
/// [`Engine::eval`] calls behave like lines entered into a REPL.
pub struct Engine {
    vm: Vm,
}

impl Engine {
    /// Creates a new engine with the runtime library registered.
    pub fn new() -> Self {
        Self { vm: Vm::new() }
    }

    /// Compiles and executes Ely source code, returning the value left on
    /// the stack at `Halt` (null if there is none).
    ///
    /// # Errors
    ///
    /// Fails with the recorded compile diagnostics, or with a runtime error
    /// carrying a call-stack trace.
    pub fn eval(&mut self, source: &str) -> Result<Value> {
        let program = Compiler::new(source).compile()?;
        debug!("compiled program:\n{}", disasm::disassemble(&program, "<script>"));
        self.vm.run(program)
    }

    /// Evaluates Ely source code from a file.
    pub fn eval_file(&mut self, path: &std::path::Path) -> Result<Value> {
        let source = std::fs::read_to_string(path)?;
        self.eval(&source)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
