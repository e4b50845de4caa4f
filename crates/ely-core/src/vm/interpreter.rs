//! The bytecode interpreter.

use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::builtins;
use crate::compiler::program::{Element, Op, Program};
use crate::error::{Error, Result};
use crate::runtime::function::{CallFrame, Function, Upvalue};
use crate::runtime::value::{HashTable, Value};

/// Maximum call depth before the VM reports a stack overflow.
const FRAMES_MAX: usize = 256;

/// The virtual machine.
///
/// Executes a [`Program`] against a value stack, a call stack of frames, a
/// global name table, and the list of open upvalues. Globals survive across
/// [`Vm::run`] calls so a REPL accumulates state.
pub struct Vm {
    program: Rc<Program>,
    pc: usize,
    stack: Vec<Value>,
    call_stack: Vec<CallFrame>,
    globals: FxHashMap<String, Value>,
    open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Vm {
    /// Creates a new VM with the runtime library registered as globals.
    pub fn new() -> Self {
        let mut vm = Self {
            program: Rc::new(Program::new()),
            pc: 0,
            stack: Vec::with_capacity(256),
            call_stack: Vec::with_capacity(64),
            globals: FxHashMap::default(),
            open_upvalues: Vec::new(),
        };
        for (name, value) in builtins::register_builtins() {
            vm.globals.insert(name, value);
        }
        vm
    }

    /// Executes a program to completion, returning the value left on the
    /// stack at `Halt` (or null if the stack is empty).
    pub fn run(&mut self, program: Program) -> Result<Value> {
        self.program = Rc::new(program);
        self.pc = 0;
        self.stack.clear();
        self.call_stack.clear();
        self.open_upvalues.clear();
        self.execute()
    }

    fn execute(&mut self) -> Result<Value> {
        loop {
            let op = self.read_op()?;
            trace!(pc = self.pc, ?op, depth = self.call_stack.len(), "execute");

            match op {
                Op::PushImmediate => {
                    let value = match self.read_element()? {
                        Element::Number(n) => Value::Number(n),
                        Element::String(s) => Value::String(s),
                        Element::Bool(b) => Value::Bool(b),
                        other => return Err(self.fail(format!("malformed immediate {other:?}"))),
                    };
                    self.stack.push(value);
                }
                Op::Null => self.stack.push(Value::Null),
                Op::Pop => {
                    self.pop()?;
                }

                Op::DefineGlobal => {
                    let name = self.read_string()?;
                    let value = self.pop()?;
                    if self.globals.contains_key(&name) {
                        return Err(self.fail(format!("global '{name}' is already defined")));
                    }
                    self.globals.insert(name, value);
                }
                Op::SetGlobal => {
                    let name = self.read_string()?;
                    let value = self.pop()?;
                    if !self.globals.contains_key(&name) {
                        return Err(self.fail(format!("unknown global '{name}'")));
                    }
                    self.globals.insert(name, value);
                }
                Op::GetGlobal => {
                    let name = self.read_string()?;
                    match self.globals.get(&name).cloned() {
                        Some(value) => self.stack.push(value),
                        None => return Err(self.fail(format!("unknown global '{name}'"))),
                    }
                }

                Op::GetLocal => {
                    let slot = self.stack_base() + self.read_index()?;
                    match self.stack.get(slot).cloned() {
                        Some(value) => self.stack.push(value),
                        None => return Err(self.fail(format!("local slot {slot} out of range"))),
                    }
                }
                Op::SetLocal => {
                    let slot = self.stack_base() + self.read_index()?;
                    let value = self.pop()?;
                    if slot >= self.stack.len() {
                        return Err(self.fail(format!("local slot {slot} out of range")));
                    }
                    self.stack[slot] = value;
                }

                Op::GetUpvalue => {
                    let index = self.read_index()?;
                    let cell = self.upvalue_cell(index)?;
                    let value = match &*cell.borrow() {
                        Upvalue::Open(slot) => self.stack[*slot].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    };
                    self.stack.push(value);
                }
                Op::SetUpvalue => {
                    let index = self.read_index()?;
                    let cell = self.upvalue_cell(index)?;
                    let value = self.pop()?;
                    let open_slot = match &*cell.borrow() {
                        Upvalue::Open(slot) => Some(*slot),
                        Upvalue::Closed(_) => None,
                    };
                    match open_slot {
                        Some(slot) => self.stack[slot] = value,
                        None => *cell.borrow_mut() = Upvalue::Closed(value),
                    }
                }

                Op::Closure => self.closure()?,

                Op::CreateHT => self.create_hash_table()?,
                Op::GetHT => self.get_hash_table()?,

                Op::Add => self.add()?,
                Op::Sub => {
                    let (a, b) = self.numeric_operands("-")?;
                    self.stack.push(Value::Number(a - b));
                }
                Op::Multiply => {
                    let (a, b) = self.numeric_operands("*")?;
                    self.stack.push(Value::Number(a * b));
                }
                Op::Divide => {
                    let (a, b) = self.numeric_operands("/")?;
                    self.stack.push(Value::Number(a / b));
                }
                Op::Greater => {
                    let (a, b) = self.numeric_operands(">")?;
                    self.stack.push(Value::Bool(a > b));
                }
                Op::Less => {
                    let (a, b) = self.numeric_operands("<")?;
                    self.stack.push(Value::Bool(a < b));
                }
                Op::Equal => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    if a.type_name() != b.type_name() {
                        return Err(self.fail(format!(
                            "cannot compare {} with {}",
                            a.type_name(),
                            b.type_name()
                        )));
                    }
                    self.stack.push(Value::Bool(a == b));
                }
                Op::Not => {
                    let value = self.pop()?;
                    match value {
                        Value::Bool(b) => self.stack.push(Value::Bool(!b)),
                        other => {
                            return Err(self.fail(format!(
                                "operand to 'not' must be a bool, got {}",
                                other.type_name()
                            )));
                        }
                    }
                }
                Op::And => {
                    let (a, b) = self.bool_operands("and")?;
                    self.stack.push(Value::Bool(a && b));
                }
                Op::Or => {
                    let (a, b) = self.bool_operands("or")?;
                    self.stack.push(Value::Bool(a || b));
                }

                Op::Call => {
                    let argc = self.read_index()?;
                    self.call_value(argc)?;
                }
                Op::Return => {
                    let count = self.read_index()?;
                    if let Some(value) = self.return_from_frame(count)? {
                        // Top-level return ends execution like Halt.
                        return Ok(value);
                    }
                }

                Op::Jump => {
                    let dest = self.read_jump_target()?;
                    self.pc = dest;
                }
                Op::JumpIfFalse => {
                    let dest = self.read_jump_target()?;
                    let condition = self.pop()?;
                    if !condition.is_truthy() {
                        self.pc = dest;
                    }
                }

                Op::Halt => {
                    return Ok(self.stack.pop().unwrap_or(Value::Null));
                }
            }
        }
    }

    // ========================================================================
    // Operand decoding
    // ========================================================================

    fn read_element(&mut self) -> Result<Element> {
        let element = self
            .program
            .get(self.pc)
            .cloned()
            .ok_or_else(|| self.fail("program counter out of range"))?;
        self.pc += 1;
        Ok(element)
    }

    fn read_op(&mut self) -> Result<Op> {
        match self.read_element()? {
            Element::Op(op) => Ok(op),
            other => Err(self.fail(format!("expected opcode, found {other:?}"))),
        }
    }

    fn read_number(&mut self) -> Result<f64> {
        match self.read_element()? {
            Element::Number(n) => Ok(n),
            other => Err(self.fail(format!("expected number operand, found {other:?}"))),
        }
    }

    fn read_index(&mut self) -> Result<usize> {
        Ok(self.read_number()? as usize)
    }

    fn read_string(&mut self) -> Result<String> {
        match self.read_element()? {
            Element::String(s) => Ok(s),
            other => Err(self.fail(format!("expected string operand, found {other:?}"))),
        }
    }

    fn read_bool(&mut self) -> Result<bool> {
        match self.read_element()? {
            Element::Bool(b) => Ok(b),
            other => Err(self.fail(format!("expected bool operand, found {other:?}"))),
        }
    }

    fn read_function(&mut self) -> Result<Rc<Function>> {
        match self.read_element()? {
            Element::Function(f) => Ok(f),
            other => Err(self.fail(format!("expected function constant, found {other:?}"))),
        }
    }

    fn read_jump_target(&mut self) -> Result<usize> {
        let dest = self.read_index()?;
        if dest >= self.program.len() {
            return Err(self.fail(format!("jump target {dest} out of range")));
        }
        Ok(dest)
    }

    // ========================================================================
    // Stack and frames
    // ========================================================================

    fn pop(&mut self) -> Result<Value> {
        self.stack
            .pop()
            .ok_or_else(|| self.fail("pop from an empty stack"))
    }

    fn stack_base(&self) -> usize {
        self.call_stack.last().map_or(0, |frame| frame.stack_base)
    }

    fn upvalue_cell(&self, index: usize) -> Result<Rc<RefCell<Upvalue>>> {
        let frame = self
            .call_stack
            .last()
            .ok_or_else(|| self.fail("upvalue access outside a function"))?;
        frame
            .closure
            .upvalues
            .get(index)
            .cloned()
            .ok_or_else(|| self.fail(format!("upvalue {index} out of range")))
    }

    fn call_value(&mut self, argc: usize) -> Result<()> {
        if self.stack.len() < argc + 1 {
            return Err(self.fail("call with too few values on the stack"));
        }
        let callee_at = self.stack.len() - argc - 1;
        let callee = self.stack[callee_at].clone();

        match callee {
            Value::NativeFunction(native) => {
                // Arguments sit above the callee in source order.
                let args = self.stack.split_off(callee_at + 1);
                self.stack.pop();
                if native.arity >= 0 && args.len() != native.arity as usize {
                    return Err(self.fail(format!(
                        "{} expects {} argument(s), got {}",
                        native.name,
                        native.arity,
                        args.len()
                    )));
                }
                trace!(name = %native.name, argc = args.len(), "call native");
                let result = (native.func)(&args).map_err(|message| self.fail(message))?;
                if !result.is_null() {
                    self.stack.push(result);
                }
            }
            Value::Function(function) => {
                if self.call_stack.len() >= FRAMES_MAX {
                    return Err(self.fail("stack overflow"));
                }
                if argc != function.arity {
                    return Err(self.fail(format!(
                        "{} expects {} argument(s), got {argc}",
                        function.name.as_deref().unwrap_or("<anonymous>"),
                        function.arity
                    )));
                }
                let frame = CallFrame {
                    name: function.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
                    program: Rc::clone(&self.program),
                    pc: self.pc,
                    stack_base: callee_at,
                    closure: Rc::clone(&function),
                    return_value: None,
                };
                trace!(name = %frame.name, argc, base = frame.stack_base, "call");
                self.program = Rc::clone(&function.program);
                self.pc = 0;
                self.call_stack.push(frame);
            }
            other => {
                return Err(self.fail(format!("cannot call a {}", other.type_name())));
            }
        }
        Ok(())
    }

    /// Tears down the current frame. Returns `Some(value)` when there is no
    /// frame to return from, i.e. a top-level `Return` that ends execution.
    fn return_from_frame(&mut self, count: usize) -> Result<Option<Value>> {
        let base = self.stack_base();
        self.close_upvalues(base);

        let value = if count == 1 {
            match self.stack.pop() {
                Some(value) => Some(value),
                None => return Err(self.fail("return with no value on the stack")),
            }
        } else {
            None
        };

        match self.call_stack.pop() {
            Some(mut frame) => {
                frame.return_value = value;
                self.program = Rc::clone(&frame.program);
                self.pc = frame.pc;
                self.stack.truncate(frame.stack_base);
                if let Some(value) = frame.return_value {
                    self.stack.push(value);
                }
                Ok(None)
            }
            None => Ok(Some(value.unwrap_or(Value::Null))),
        }
    }

    // ========================================================================
    // Upvalues
    // ========================================================================

    fn closure(&mut self) -> Result<()> {
        let constant = self.read_function()?;
        let mut upvalues = Vec::with_capacity(constant.upvalue_count);
        for _ in 0..constant.upvalue_count {
            let is_local = self.read_bool()?;
            let index = self.read_index()?;
            let cell = if is_local {
                self.capture_upvalue(self.stack_base() + index)
            } else {
                self.upvalue_cell(index)?
            };
            upvalues.push(cell);
        }
        self.stack.push(Value::Function(Rc::new(constant.bind(upvalues))));
        Ok(())
    }

    /// Captures the stack slot as an open upvalue, reusing an existing cell
    /// so every closure over the same variable shares it.
    fn capture_upvalue(&mut self, slot: usize) -> Rc<RefCell<Upvalue>> {
        for cell in &self.open_upvalues {
            if matches!(&*cell.borrow(), Upvalue::Open(open) if *open == slot) {
                return Rc::clone(cell);
            }
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.push(cell.clone());
        cell
    }

    /// Closes every open upvalue at or above `from`, copying the stack value
    /// into the cell before the slot disappears.
    fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let slot = match &*self.open_upvalues[i].borrow() {
                Upvalue::Open(slot) if *slot >= from => Some(*slot),
                _ => None,
            };
            match slot {
                Some(slot) => {
                    let value = self.stack[slot].clone();
                    *self.open_upvalues[i].borrow_mut() = Upvalue::Closed(value);
                    self.open_upvalues.swap_remove(i);
                }
                None => i += 1,
            }
        }
    }

    // ========================================================================
    // Hash tables
    // ========================================================================

    fn create_hash_table(&mut self) -> Result<()> {
        let count = self.read_index()?;
        if self.stack.len() < count * 2 {
            return Err(self.fail("hash table entries missing from the stack"));
        }
        let raw = self.stack.split_off(self.stack.len() - count * 2);
        let mut pairs = Vec::with_capacity(count);
        let mut iter = raw.into_iter();
        while let (Some(key), Some(value)) = (iter.next(), iter.next()) {
            let Value::String(key) = key else {
                return Err(self.fail(format!(
                    "hash table key must be a string, got {}",
                    key.type_name()
                )));
            };
            pairs.push((key, value));
        }
        let table = HashTable::from_pairs(pairs);
        self.stack.push(Value::HashTable(Rc::new(RefCell::new(table))));
        Ok(())
    }

    fn get_hash_table(&mut self) -> Result<()> {
        let key = self.pop()?;
        let table = self.pop()?;
        let Value::HashTable(table) = table else {
            return Err(self.fail(format!("cannot index a {}", table.type_name())));
        };
        // Numeric keys coerce to their string form, so xs[1] reads "1".
        let (key_text, numeric) = match &key {
            Value::String(s) => (s.clone(), false),
            Value::Number(n) => (n.to_string(), true),
            other => {
                return Err(self.fail(format!(
                    "hash table key must be a string or number, got {}",
                    other.type_name()
                )));
            }
        };
        let found = table.borrow().get(&key_text).cloned();
        match found {
            Some(value) => {
                self.stack.push(value);
                Ok(())
            }
            None if numeric => Err(self.fail(format!("index {key_text} out of range"))),
            None => Err(self.fail(format!("key \"{key_text}\" not found"))),
        }
    }

    // ========================================================================
    // Arithmetic
    // ========================================================================

    fn add(&mut self) -> Result<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        let result = match (&a, &b) {
            (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
            (Value::String(x), Value::String(y)) => Value::String(format!("{x}{y}")),
            (Value::String(_), Value::Number(_)) | (Value::Number(_), Value::String(_)) => {
                Value::String(format!("{a}{b}"))
            }
            _ => {
                return Err(self.fail(format!(
                    "cannot add {} and {}",
                    a.type_name(),
                    b.type_name()
                )));
            }
        };
        self.stack.push(result);
        Ok(())
    }

    fn numeric_operands(&mut self, op: &str) -> Result<(f64, f64)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => Ok((a, b)),
            (a, b) => Err(self.fail(format!(
                "operands to '{op}' must be numbers, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    fn bool_operands(&mut self, op: &str) -> Result<(bool, bool)> {
        let b = self.pop()?;
        let a = self.pop()?;
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Ok((a, b)),
            (a, b) => Err(self.fail(format!(
                "operands to '{op}' must be bools, got {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    // ========================================================================
    // Failure
    // ========================================================================

    /// Builds a fatal runtime error carrying the call-stack trace.
    fn fail(&self, message: impl Into<String>) -> Error {
        let mut text = format!("runtime error: {}", message.into());
        for frame in self.call_stack.iter().rev() {
            text.push_str("\n    in ");
            text.push_str(&frame.name);
            text.push_str("()");
        }
        text.push_str("\n    in <script>");
        Error::Runtime(text)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::Compiler;

    fn run(source: &str) -> Result<Value> {
        let program = Compiler::new(source).compile()?;
        Vm::new().run(program)
    }

    fn run_ok(source: &str) -> Value {
        run(source).expect("program should run")
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run_ok("1 + 2 * 3"), Value::Number(7.0));
        assert_eq!(run_ok("10 / 4"), Value::Number(2.5));
        assert_eq!(run_ok("7 - 2"), Value::Number(5.0));
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(run_ok("5 > 3"), Value::Bool(true));
        assert_eq!(run_ok("5 < 3"), Value::Bool(false));
        assert_eq!(run_ok("2 == 2"), Value::Bool(true));
        assert_eq!(run_ok("2 != 2"), Value::Bool(false));
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(run_ok("\"foo\" + \"bar\""), Value::String("foobar".to_string()));
        assert_eq!(run_ok("\"n = \" + 3"), Value::String("n = 3".to_string()));
        assert_eq!(run_ok("3 + \"!\""), Value::String("3!".to_string()));
    }

    #[test]
    fn test_add_type_error() {
        let err = run("1 + true").unwrap_err();
        assert!(err.to_string().contains("cannot add number and bool"));
    }

    #[test]
    fn test_equal_requires_same_tag() {
        let err = run("1 == \"1\"").unwrap_err();
        assert!(err.to_string().contains("cannot compare number with string"));
    }

    #[test]
    fn test_logical_operators_are_strict() {
        assert_eq!(run_ok("true and false"), Value::Bool(false));
        assert_eq!(run_ok("false or true"), Value::Bool(true));
        let err = run("1 and true").unwrap_err();
        assert!(err.to_string().contains("must be bools"));
    }

    #[test]
    fn test_not_requires_bool() {
        assert_eq!(run_ok("not false"), Value::Bool(true));
        assert!(run("not 1").is_err());
    }

    #[test]
    fn test_globals() {
        assert_eq!(run_ok("var x = 4 x = x + 1 x"), Value::Number(5.0));
    }

    #[test]
    fn test_redefined_global_fails() {
        let err = run("var x = 1 var x = 2").unwrap_err();
        assert!(err.to_string().contains("already defined"));
    }

    #[test]
    fn test_unknown_global_fails() {
        let err = run("nope").unwrap_err();
        assert!(err.to_string().contains("unknown global 'nope'"));
        let err = run("nope = 1").unwrap_err();
        assert!(err.to_string().contains("unknown global 'nope'"));
    }

    #[test]
    fn test_while_loop() {
        assert_eq!(run_ok("var i = 0 while i < 3 do i = i + 1 end i"), Value::Number(3.0));
    }

    #[test]
    fn test_while_condition_truthiness() {
        // Loop runs while the string is non-empty; assignment empties it.
        assert_eq!(
            run_ok("var s = \"x\" var n = 0 while s do s = \"\" n = 1 end n"),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_if_branches() {
        assert_eq!(run_ok("if 5 > 3 then \"a\" else \"b\" end"), Value::String("a".to_string()));
        assert_eq!(run_ok("if 3 > 5 then \"a\" else \"b\" end"), Value::String("b".to_string()));
        assert_eq!(
            run_ok("if 1 > 2 then \"a\" elseif 2 > 1 then \"b\" else \"c\" end"),
            Value::String("b".to_string())
        );
    }

    #[test]
    fn test_function_call() {
        assert_eq!(
            run_ok("function add(a, b) return a + b end add(add(10, 2), 2)"),
            Value::Number(14.0)
        );
    }

    #[test]
    fn test_function_without_return_pushes_nothing() {
        assert_eq!(run_ok("function noop() end noop()"), Value::Null);
    }

    #[test]
    fn test_arity_mismatch() {
        let err = run("function f(a) return a end f(1, 2)").unwrap_err();
        assert!(err.to_string().contains("expects 1 argument(s), got 2"));
    }

    #[test]
    fn test_calling_a_non_function() {
        let err = run("var x = 1 x(2)").unwrap_err();
        assert!(err.to_string().contains("cannot call a number"));
    }

    #[test]
    fn test_recursion() {
        assert_eq!(
            run_ok(
                "function fib(n)\n\
                 if n < 2 then return n end\n\
                 return fib(n - 1) + fib(n - 2)\n\
                 end\n\
                 fib(10)"
            ),
            Value::Number(55.0)
        );
    }

    #[test]
    fn test_closure_counter() {
        assert_eq!(
            run_ok(
                "function makeCounter()\n\
                 var n = 0\n\
                 function bump() n = n + 1 return n end\n\
                 return bump\n\
                 end\n\
                 var c = makeCounter()\n\
                 c() c() c()"
            ),
            Value::Number(3.0)
        );
    }

    #[test]
    fn test_two_counters_are_independent() {
        assert_eq!(
            run_ok(
                "function makeCounter()\n\
                 var n = 0\n\
                 function bump() n = n + 1 return n end\n\
                 return bump\n\
                 end\n\
                 var a = makeCounter()\n\
                 var b = makeCounter()\n\
                 a() a()\n\
                 b()"
            ),
            Value::Number(1.0)
        );
    }

    #[test]
    fn test_closures_share_open_upvalue() {
        // Both closures capture the same `n`; writes through one are visible
        // through the other even after the owning frame returns.
        assert_eq!(
            run_ok(
                "function make()\n\
                 var n = 0\n\
                 function set() n = 41 end\n\
                 function get() return n end\n\
                 return [set, get]\n\
                 end\n\
                 var pair = make()\n\
                 pair[0]()\n\
                 pair[1]() + 1"
            ),
            Value::Number(42.0)
        );
    }

    #[test]
    fn test_list_literal_and_subscript() {
        assert_eq!(run_ok("var xs = [10, 20, 30] xs[1]"), Value::Number(20.0));
        assert_eq!(run_ok("var xs = [10, 20, 30] xs[\"2\"]"), Value::Number(30.0));
    }

    #[test]
    fn test_hash_table_literal_and_lookup() {
        assert_eq!(run_ok("{\"k\": 7}[\"k\"]"), Value::Number(7.0));
    }

    #[test]
    fn test_missing_keys() {
        let err = run("[1, 2][5]").unwrap_err();
        assert!(err.to_string().contains("index 5 out of range"));
        let err = run("{\"a\": 1}[\"b\"]").unwrap_err();
        assert!(err.to_string().contains("key \"b\" not found"));
    }

    #[test]
    fn test_empty_program_yields_null() {
        assert_eq!(run_ok(""), Value::Null);
        assert_eq!(run_ok("var x = 1"), Value::Null);
    }

    #[test]
    fn test_runtime_error_carries_stack_trace() {
        let err = run(
            "function inner() return missing end\n\
             function outer() return inner() end\n\
             outer()",
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("unknown global 'missing'"));
        let inner_at = message.find("in inner()").unwrap();
        let outer_at = message.find("in outer()").unwrap();
        let script_at = message.find("in <script>").unwrap();
        assert!(inner_at < outer_at && outer_at < script_at);
    }

    #[test]
    fn test_globals_persist_across_runs() {
        let mut vm = Vm::new();
        let program = Compiler::new("var x = 21").compile().unwrap();
        vm.run(program).unwrap();
        let program = Compiler::new("x * 2").compile().unwrap();
        assert_eq!(vm.run(program).unwrap(), Value::Number(42.0));
    }

    #[test]
    fn test_builtin_len() {
        assert_eq!(run_ok("len([10, 20, 30])"), Value::Number(3.0));
        assert!(run("len(1)").is_err());
    }

    #[test]
    fn test_builtin_str() {
        assert_eq!(run_ok("str(1.5)"), Value::String("1.5".to_string()));
        assert_eq!(run_ok("str(true)"), Value::String("true".to_string()));
    }

    #[test]
    fn test_str_fails_on_null() {
        let err = run("var n\nstr(n)").unwrap_err();
        assert!(err.to_string().contains("null"));
    }

    #[test]
    fn test_unbounded_recursion_overflows() {
        let err = run("function f() return f() end f()").unwrap_err();
        assert!(err.to_string().contains("stack overflow"));
    }

    #[test]
    fn test_str_number_round_trip() {
        assert_eq!(run_ok("str(20) + \"\""), Value::String("20".to_string()));
        assert_eq!(run_ok("str(0.25)"), Value::String("0.25".to_string()));
    }

    #[test]
    fn test_top_level_return_halts() {
        assert_eq!(run_ok("return 9"), Value::Number(9.0));
    }
}
