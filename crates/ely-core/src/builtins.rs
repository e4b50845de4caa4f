//! The built-in runtime library.
//!
//! Four natives are exposed to scripts as globals: `print`, `read_line`,
//! `str`, and `len`. Natives receive their arguments in source order and
//! report failures as plain messages; the VM attaches the stack trace.

use std::io::BufRead;
use std::rc::Rc;

use crate::runtime::function::{NativeFunction, ARITY_VARIADIC};
use crate::runtime::value::Value;

/// Returns the runtime library as (name, value) pairs for the globals table.
pub fn register_builtins() -> Vec<(String, Value)> {
    [
        ("print", ARITY_VARIADIC, native_print as fn(&[Value]) -> Result<Value, String>),
        ("read_line", 0, native_read_line),
        ("str", 1, native_str),
        ("len", 1, native_len),
    ]
    .into_iter()
    .map(|(name, arity, func)| {
        let native = NativeFunction { name: name.to_string(), arity, func };
        (name.to_string(), Value::NativeFunction(Rc::new(native)))
    })
    .collect()
}

/// `print(...)` - writes space-separated stringified arguments and a newline.
fn native_print(args: &[Value]) -> Result<Value, String> {
    let line = args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ");
    println!("{line}");
    Ok(Value::Null)
}

/// `read_line()` - reads one line from standard input, without the newline.
fn native_read_line(_args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|err| format!("read_line: {err}"))?;
    while line.ends_with('\n') || line.ends_with('\r') {
        line.pop();
    }
    Ok(Value::String(line))
}

/// `str(v)` - converts a value to its string form. Fails on null.
fn native_str(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::Null => Err("str: cannot convert null to a string".to_string()),
        value => Ok(Value::String(value.to_string())),
    }
}

/// `len(v)` - the element count of a hash table.
fn native_len(args: &[Value]) -> Result<Value, String> {
    match &args[0] {
        Value::HashTable(table) => Ok(Value::Number(table.borrow().count as f64)),
        other => Err(format!("len: expected a hash table, got {}", other.type_name())),
    }
}
