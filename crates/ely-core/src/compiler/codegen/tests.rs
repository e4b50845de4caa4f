//! Tests for the single-pass compiler.

use std::rc::Rc;

use super::*;
use crate::compiler::program::{Element, Op, Program};
use crate::runtime::function::Function;

fn compile_source(src: &str) -> Result<Program> {
    Compiler::new(src).compile()
}

fn compile_ok(src: &str) -> Program {
    compile_source(src).expect("compilation should succeed")
}

fn ops(program: &Program) -> Vec<Op> {
    // Operands are never `Element::Op`, so filtering yields the opcode
    // sequence without positional decoding.
    (0..program.len())
        .filter_map(|i| match program.get(i) {
            Some(Element::Op(op)) => Some(*op),
            _ => None,
        })
        .collect()
}

fn function_constants(program: &Program) -> Vec<Rc<Function>> {
    (0..program.len())
        .filter_map(|i| match program.get(i) {
            Some(Element::Function(f)) => Some(Rc::clone(f)),
            _ => None,
        })
        .collect()
}

fn jump_targets_in_range(program: &Program) -> bool {
    (0..program.len()).all(|i| match program.get(i) {
        Some(Element::Op(Op::Jump | Op::JumpIfFalse)) => match program.get(i + 1) {
            Some(Element::Number(dest)) => (*dest as usize) <= program.len(),
            _ => false,
        },
        _ => true,
    })
}

#[test]
fn test_compile_empty_program() {
    let program = compile_ok("");
    assert_eq!(ops(&program), vec![Op::Halt]);
}

#[test]
fn test_compile_number_literal() {
    let program = compile_ok("42");
    assert_eq!(ops(&program), vec![Op::PushImmediate, Op::Halt]);
    assert!(matches!(program.get(1), Some(Element::Number(n)) if *n == 42.0));
}

#[test]
fn test_number_parse_float_semantics() {
    let program = compile_ok("1.2.3");
    assert!(matches!(program.get(1), Some(Element::Number(n)) if *n == 1.2));
}

#[test]
fn test_compile_string_and_bool_literals() {
    let program = compile_ok("\"hi\"");
    assert!(matches!(program.get(1), Some(Element::String(s)) if s == "hi"));
    let program = compile_ok("true");
    assert!(matches!(program.get(1), Some(Element::Bool(true))));
}

#[test]
fn test_precedence_product_binds_tighter_than_sum() {
    let program = compile_ok("1 + 2 * 3");
    assert_eq!(
        ops(&program),
        vec![
            Op::PushImmediate,
            Op::PushImmediate,
            Op::PushImmediate,
            Op::Multiply,
            Op::Add,
            Op::Halt,
        ]
    );
}

#[test]
fn test_not_equal_lowers_to_equal_not() {
    let program = compile_ok("1 != 2");
    assert_eq!(
        ops(&program),
        vec![Op::PushImmediate, Op::PushImmediate, Op::Equal, Op::Not, Op::Halt]
    );
}

#[test]
fn test_unary_not() {
    let program = compile_ok("not true");
    assert_eq!(ops(&program), vec![Op::PushImmediate, Op::Not, Op::Halt]);
}

#[test]
fn test_var_declaration_at_top_level_defines_global() {
    let program = compile_ok("var x = 1");
    assert_eq!(ops(&program), vec![Op::PushImmediate, Op::DefineGlobal, Op::Halt]);
    assert!(matches!(program.get(3), Some(Element::String(s)) if s == "x"));
}

#[test]
fn test_var_without_initializer_is_null() {
    let program = compile_ok("var x");
    assert_eq!(ops(&program), vec![Op::Null, Op::DefineGlobal, Op::Halt]);
}

#[test]
fn test_global_read_and_assignment() {
    let program = compile_ok("var x = 1 x = 2 x");
    assert_eq!(
        ops(&program),
        vec![
            Op::PushImmediate,
            Op::DefineGlobal,
            Op::PushImmediate,
            Op::SetGlobal,
            Op::GetGlobal,
            Op::Halt,
        ]
    );
}

#[test]
fn test_while_emits_backpatched_jumps() {
    let program = compile_ok("var i = 0 while i < 3 do i = i + 1 end");
    assert!(jump_targets_in_range(&program));
    let opcodes = ops(&program);
    assert!(opcodes.contains(&Op::JumpIfFalse));
    assert!(opcodes.contains(&Op::Jump));
}

#[test]
fn test_while_body_locals_are_popped() {
    let program = compile_ok("while false do var x = 1 end");
    let pops = ops(&program).iter().filter(|op| **op == Op::Pop).count();
    assert_eq!(pops, 1);
}

#[test]
fn test_if_elseif_else_jumps_in_range() {
    let program = compile_ok(
        "if 1 > 2 then var a = 1 elseif 2 > 3 then var b = 2 else var c = 3 end",
    );
    assert!(jump_targets_in_range(&program));
}

#[test]
fn test_plain_if_patches_to_end() {
    let program = compile_ok("if true then end");
    // PushImmediate true, JumpIfFalse -> end, Halt
    assert_eq!(ops(&program), vec![Op::PushImmediate, Op::JumpIfFalse, Op::Halt]);
    assert!(jump_targets_in_range(&program));
}

#[test]
fn test_function_statement_emits_closure_then_define() {
    let program = compile_ok("function add(a, b) return a + b end");
    assert_eq!(ops(&program), vec![Op::Closure, Op::DefineGlobal, Op::Halt]);

    let constants = function_constants(&program);
    assert_eq!(constants.len(), 1);
    let add = &constants[0];
    assert_eq!(add.name.as_deref(), Some("add"));
    assert_eq!(add.arity, 2);
    assert_eq!(add.upvalue_count, 0);
}

#[test]
fn test_function_body_ends_with_implicit_return() {
    let program = compile_ok("function f() end");
    let f = &function_constants(&program)[0];
    assert_eq!(ops(&f.program), vec![Op::Return]);
    // Implicit return carries a count of zero.
    assert!(matches!(f.program.get(1), Some(Element::Number(n)) if *n == 0.0));
}

#[test]
fn test_function_params_resolve_as_locals() {
    let program = compile_ok("function first(a, b) return a end");
    let f = &function_constants(&program)[0];
    // Slot 0 is the function itself, so `a` is slot 1.
    assert_eq!(ops(&f.program), vec![Op::GetLocal, Op::Return, Op::Return]);
    assert!(matches!(f.program.get(1), Some(Element::Number(n)) if *n == 1.0));
}

#[test]
fn test_return_with_and_without_value() {
    let program = compile_ok("function f() return 1 end");
    let f = &function_constants(&program)[0];
    assert!(matches!(f.program.get(3), Some(Element::Number(n)) if *n == 1.0));

    let program = compile_ok("function f() return end");
    let f = &function_constants(&program)[0];
    assert!(matches!(f.program.get(1), Some(Element::Number(n)) if *n == 0.0));
}

#[test]
fn test_closure_upvalue_descriptors_match_count() {
    let program = compile_ok(
        "function outer()\n\
         var n = 0\n\
         function inner() return n end\n\
         return inner\n\
         end",
    );
    let outer = &function_constants(&program)[0];
    let inner = &function_constants(&outer.program)[0];
    assert_eq!(inner.upvalue_count, 1);

    // The Closure op in outer's program is followed by the constant and one
    // (is-local, index) pair pointing at outer's local slot 1.
    let closure_at = (0..outer.program.len())
        .find(|i| matches!(outer.program.get(*i), Some(Element::Op(Op::Closure))))
        .unwrap();
    assert!(matches!(outer.program.get(closure_at + 2), Some(Element::Bool(true))));
    assert!(matches!(outer.program.get(closure_at + 3), Some(Element::Number(n)) if *n == 1.0));

    // Inside inner, the captured variable reads through upvalue 0.
    assert_eq!(ops(&inner.program), vec![Op::GetUpvalue, Op::Return, Op::Return]);
}

#[test]
fn test_upvalue_chains_through_intermediate_function() {
    let program = compile_ok(
        "function a()\n\
         var x = 1\n\
         function b()\n\
         function c() return x end\n\
         return c\n\
         end\n\
         return b\n\
         end",
    );
    let a = &function_constants(&program)[0];
    let b = &function_constants(&a.program)[0];
    let c = &function_constants(&b.program)[0];
    assert_eq!(b.upvalue_count, 1);
    assert_eq!(c.upvalue_count, 1);
}

#[test]
fn test_anonymous_function_expression() {
    let program = compile_ok("var f = function(x) return x end");
    assert_eq!(ops(&program), vec![Op::Closure, Op::DefineGlobal, Op::Halt]);
    let f = &function_constants(&program)[0];
    assert!(f.name.is_none());
    assert_eq!(f.arity, 1);
}

#[test]
fn test_call_emits_arg_count() {
    let program = compile_ok("f(1, 2, 3)");
    let call_at = (0..program.len())
        .find(|i| matches!(program.get(*i), Some(Element::Op(Op::Call))))
        .unwrap();
    assert!(matches!(program.get(call_at + 1), Some(Element::Number(n)) if *n == 3.0));
}

#[test]
fn test_list_literal_emits_indexed_keys() {
    let program = compile_ok("[10, 20, 30]");
    assert!(matches!(program.get(1), Some(Element::String(s)) if s == "0"));
    assert!(matches!(program.get(5), Some(Element::String(s)) if s == "1"));
    assert!(matches!(program.get(9), Some(Element::String(s)) if s == "2"));
    let create_at = (0..program.len())
        .find(|i| matches!(program.get(*i), Some(Element::Op(Op::CreateHT))))
        .unwrap();
    assert!(matches!(program.get(create_at + 1), Some(Element::Number(n)) if *n == 3.0));
}

#[test]
fn test_hash_table_literal() {
    let program = compile_ok("{\"k\": 1, \"j\": 2}");
    let opcodes = ops(&program);
    assert_eq!(opcodes.iter().filter(|op| **op == Op::PushImmediate).count(), 4);
    assert!(opcodes.contains(&Op::CreateHT));
}

#[test]
fn test_subscript() {
    let program = compile_ok("xs[1]");
    assert_eq!(
        ops(&program),
        vec![Op::GetGlobal, Op::PushImmediate, Op::GetHT, Op::Halt]
    );
}

#[test]
fn test_logical_operators_compile_without_short_circuit() {
    let program = compile_ok("true and false or true");
    let opcodes = ops(&program);
    assert!(opcodes.contains(&Op::And));
    assert!(opcodes.contains(&Op::Or));
    assert!(!opcodes.contains(&Op::Jump));
}

#[test]
fn test_error_unexpected_token() {
    let err = compile_source("var x = +").unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("flagrant error on line 1"));
    assert!(message.contains("unexpected token"));
}

#[test]
fn test_error_missing_then() {
    let err = compile_source("if true var x = 1 end").unwrap_err();
    assert!(err.to_string().contains("expected 'then'"));
}

#[test]
fn test_error_invalid_assignment_target() {
    let err = compile_source("(a) = 1").unwrap_err();
    assert!(err.to_string().contains("invalid operator"));
}

#[test]
fn test_error_hash_key_must_be_string() {
    let err = compile_source("{1: 2}").unwrap_err();
    assert!(err.to_string().contains("expected string key"));
}

#[test]
fn test_break_has_no_statement_rule() {
    let err = compile_source("break").unwrap_err();
    assert!(err.to_string().contains("unexpected token 'break'"));
}

#[test]
fn test_synchronization_reports_multiple_errors() {
    let err = compile_source("var = 1\nvar y = @\nvar 2").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("flagrant error on line 1"));
    assert!(message.contains("flagrant error on line 2"));
    assert!(message.contains("flagrant error on line 3"));
}

#[test]
fn test_recovery_keeps_compiling_after_error() {
    // The second statement is fine and should not produce a diagnostic.
    let err = compile_source("var = 1\nvar ok = 2").unwrap_err();
    let message = err.to_string();
    assert_eq!(message.matches("flagrant error").count(), 1);
}

#[test]
fn test_local_assignment_in_function() {
    let program = compile_ok("function f(a) a = 2 end");
    let f = &function_constants(&program)[0];
    assert_eq!(ops(&f.program), vec![Op::PushImmediate, Op::SetLocal, Op::Return]);
}

#[test]
fn test_duplicate_local_is_an_error() {
    let err = compile_source("function f() var x = 1 var x = 2 end").unwrap_err();
    assert!(err.to_string().contains("already declared"));
}

#[test]
fn test_recursion_resolves_through_slot_zero() {
    let program = compile_ok("function loop(n) return loop(n) end");
    let f = &function_constants(&program)[0];
    // The recursive callee is GetLocal 0, not a global read.
    assert_eq!(ops(&f.program)[0], Op::GetLocal);
    assert!(matches!(f.program.get(1), Some(Element::Number(n)) if *n == 0.0));
}
