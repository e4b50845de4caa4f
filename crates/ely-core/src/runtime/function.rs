//! Function, closure, and call-frame representation.

use std::cell::RefCell;
use std::rc::Rc;

use super::value::Value;
use crate::compiler::Program;

/// Arity sentinel for variadic native functions.
pub const ARITY_VARIADIC: i32 = -1;

/// An Ely function.
///
/// The compiler stores one of these inside the enclosing program as an
/// inline constant with an empty `upvalues` list; the `Closure` opcode
/// instantiates it by binding the captured cells. All invocations of one
/// closure instance share the same cells.
#[derive(Debug)]
pub struct Function {
    /// The function name, if declared with one
    pub name: Option<String>,
    /// Number of declared parameters
    pub arity: usize,
    /// The compiled body
    pub program: Rc<Program>,
    /// How many upvalue descriptor pairs follow the `Closure` opcode
    pub upvalue_count: usize,
    /// Captured cells, bound at `Closure` time (empty on the constant)
    pub upvalues: Vec<Rc<RefCell<Upvalue>>>,
}

impl Function {
    /// Binds captured cells to this function constant, producing the
    /// runtime closure instance pushed by the `Closure` opcode.
    pub fn bind(&self, upvalues: Vec<Rc<RefCell<Upvalue>>>) -> Function {
        Function {
            name: self.name.clone(),
            arity: self.arity,
            program: Rc::clone(&self.program),
            upvalue_count: self.upvalue_count,
            upvalues,
        }
    }
}

/// A captured variable cell.
///
/// Open while the frame that owns the variable is live (pointing at an
/// absolute stack slot), closed once that frame returns. Cells are shared:
/// every closure capturing the same slot holds the same `Rc`.
#[derive(Debug, Clone)]
pub enum Upvalue {
    /// Points at a live stack slot by absolute index
    Open(usize),
    /// Owns the value copied out of the stack when the frame returned
    Closed(Value),
}

/// The host-callable signature for native functions.
pub type NativeFn = fn(&[Value]) -> Result<Value, String>;

/// A native (Rust) function exposed to scripts as a global.
#[derive(Clone)]
pub struct NativeFunction {
    /// The function name
    pub name: String,
    /// Expected argument count, or [`ARITY_VARIADIC`]
    pub arity: i32,
    /// The host function pointer
    pub func: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// A call frame for one in-flight function invocation.
#[derive(Debug)]
pub struct CallFrame {
    /// Name of the function being executed, for stack traces
    pub name: String,
    /// The caller's program, restored on return
    pub program: Rc<Program>,
    /// The caller's program counter, restored on return
    pub pc: usize,
    /// Stack index of the callee; locals index from here
    pub stack_base: usize,
    /// The closure being executed
    pub closure: Rc<Function>,
    /// Value stored by `Return 1`, pushed after the frame is torn down
    pub return_value: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_shares_the_program() {
        let proto = Function {
            name: Some("f".to_string()),
            arity: 2,
            program: Rc::new(Program::new()),
            upvalue_count: 1,
            upvalues: Vec::new(),
        };
        let cell = Rc::new(RefCell::new(Upvalue::Closed(Value::Number(1.0))));
        let closure = proto.bind(vec![Rc::clone(&cell)]);
        assert!(Rc::ptr_eq(&proto.program, &closure.program));
        assert_eq!(closure.arity, 2);
        assert_eq!(closure.upvalues.len(), 1);
        assert!(Rc::ptr_eq(&closure.upvalues[0], &cell));
    }

    #[test]
    fn test_upvalue_cell_is_shared() {
        let cell = Rc::new(RefCell::new(Upvalue::Open(3)));
        let alias = Rc::clone(&cell);
        *cell.borrow_mut() = Upvalue::Closed(Value::Number(7.0));
        match &*alias.borrow() {
            Upvalue::Closed(Value::Number(n)) => assert_eq!(*n, 7.0),
            other => panic!("expected closed cell, got {other:?}"),
        };
    }
}
