//! The bytecode compiler for Ely.
//!
//! Parses tokens with Pratt precedence climbing and emits a [`Program`]
//! directly while parsing.

mod codegen;
pub mod program;
pub mod rules;

pub use codegen::{Compiler, FunctionCtx, Local, UpvalueRef};
pub use program::{Element, Op, Program};
pub use rules::Precedence;
