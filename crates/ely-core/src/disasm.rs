//! Program disassembly for debug tracing.
//!
//! Renders a [`Program`] one instruction per line with operands inline,
//! then recurses into every function constant it references.

use std::fmt::Write as _;
use std::rc::Rc;

use crate::compiler::program::{Element, Op, Program};
use crate::runtime::function::Function;

/// Renders a program and all nested function bodies as text.
pub fn disassemble(program: &Program, name: &str) -> String {
    let mut out = String::new();
    let mut functions: Vec<Rc<Function>> = Vec::new();
    disassemble_into(program, name, &mut out, &mut functions);

    while let Some(function) = functions.pop() {
        let name = function.name.clone().unwrap_or_else(|| "<anonymous>".to_string());
        out.push('\n');
        disassemble_into(&function.program, &name, &mut out, &mut functions);
    }
    out
}

fn disassemble_into(
    program: &Program,
    name: &str,
    out: &mut String,
    functions: &mut Vec<Rc<Function>>,
) {
    let _ = writeln!(out, "== {name} ==");
    let mut pc = 0;
    while pc < program.len() {
        let Some(Element::Op(op)) = program.get(pc) else {
            // Stray operand; surface it rather than guessing.
            let _ = writeln!(out, "{pc:04}  ?? {:?}", program.get(pc));
            pc += 1;
            continue;
        };
        let _ = write!(out, "{pc:04}  {op:?}");
        pc += 1;
        pc = operands(program, *op, pc, out, functions);
        out.push('\n');
    }
}

/// Writes the operands following `op`, returning the next opcode offset.
fn operands(
    program: &Program,
    op: Op,
    mut pc: usize,
    out: &mut String,
    functions: &mut Vec<Rc<Function>>,
) -> usize {
    match op {
        Op::PushImmediate => {
            match program.get(pc) {
                Some(Element::Number(n)) => {
                    let _ = write!(out, " {n}");
                }
                Some(Element::String(s)) => {
                    let _ = write!(out, " \"{s}\"");
                }
                Some(Element::Bool(b)) => {
                    let _ = write!(out, " {b}");
                }
                other => {
                    let _ = write!(out, " ?? {other:?}");
                }
            }
            pc + 1
        }
        Op::DefineGlobal | Op::SetGlobal | Op::GetGlobal => {
            if let Some(Element::String(name)) = program.get(pc) {
                let _ = write!(out, " '{name}'");
            }
            pc + 1
        }
        Op::GetLocal
        | Op::SetLocal
        | Op::GetUpvalue
        | Op::SetUpvalue
        | Op::CreateHT
        | Op::Call
        | Op::Return
        | Op::Jump
        | Op::JumpIfFalse => {
            if let Some(Element::Number(n)) = program.get(pc) {
                let _ = write!(out, " {n}");
            }
            pc + 1
        }
        Op::Closure => {
            let Some(Element::Function(function)) = program.get(pc) else {
                return pc;
            };
            let name = function.name.as_deref().unwrap_or("<anonymous>");
            let _ = write!(out, " {name} ({} upvalues)", function.upvalue_count);
            functions.push(Rc::clone(function));
            pc += 1;
            for _ in 0..function.upvalue_count {
                if let (Some(Element::Bool(is_local)), Some(Element::Number(index))) =
                    (program.get(pc), program.get(pc + 1))
                {
                    let kind = if *is_local { "local" } else { "upvalue" };
                    let _ = write!(out, " [{kind} {index}]");
                }
                pc += 2;
            }
            pc
        }
        _ => pc,
    }
}
