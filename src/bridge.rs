//! The Call Bridge: host-to-script invocation.
//!
//! Every call follows the same protocol:
//!
//! 1. open a fresh handle scope and anchor the arguments in it;
//! 2. invoke the target through the engine's catching entry point;
//! 3. inspect the error slot *before* looking at results. A trapped error
//!    is forwarded to the diagnostic sink exactly once, the slot is
//!    cleared, and the call reports [`BridgeError::Script`] with no value;
//! 4. on success, a value-returning call must see exactly one result.
//!    Anything else is a broken native binding, not a script failure, and
//!    panics with the callable's name and the observed count;
//! 5. the result is re-anchored in the caller's scope before the call
//!    scope closes, so it outlives the call without being retained.
//!
//! Void calls skip step 4: results are discarded and their count is not
//! checked.

use crate::engine::Engine;
use crate::error::{BridgeError, ScriptError};
use crate::heap::{Handle, Scope};
use crate::marshal;
use crate::platform::DiagnosticKind;
use crate::prelude::*;
use crate::value::{CheapClone, NativeFn, ObjKind, ScriptFnPtr, ScriptStr, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultMode {
    /// Exactly one result is required and returned.
    Value,
    /// Results are discarded without counting them.
    Void,
}

// ============================================================================
// Call protocol core
// ============================================================================

#[allow(clippy::panic)]
fn dispatch(
    engine: &mut Engine,
    caller: &Scope,
    func: &NativeFn,
    args: &[Value],
    mode: ResultMode,
) -> Result<Value, BridgeError> {
    let call_scope = engine.heap().open_scope();
    for arg in args {
        call_scope.keep_value(arg);
    }

    let mut results = engine.run_catching(func, args);

    // The slot outranks the result list: a trapped error means whatever is
    // in the list is garbage.
    if let Some(err) = engine.take_error() {
        let message = err.to_string();
        engine.sink().report(DiagnosticKind::ScriptError, &message);
        return Err(BridgeError::Script { message });
    }

    match mode {
        ResultMode::Void => Ok(Value::Null),
        ResultMode::Value => {
            if results.len() != 1 {
                panic!(
                    "result contract violation: `{}` produced {} result(s), expected exactly 1",
                    func.name,
                    results.len()
                );
            }
            let value = results.swap_remove(0);
            caller.keep_value(&value);
            Ok(value)
        }
    }
}

fn script_failure(engine: &Engine, err: ScriptError) -> Result<Value, BridgeError> {
    let message = err.to_string();
    engine.sink().report(DiagnosticKind::ScriptError, &message);
    Err(BridgeError::Script { message })
}

fn receiver_class(recv: &Value) -> Option<ScriptStr> {
    match recv {
        Value::Str(s) => Some(s.cheap_clone()),
        Value::Obj(h) => h.borrow().record_class().map(ScriptStr::cheap_clone),
        _ => None,
    }
}

fn dispatch_method(
    engine: &mut Engine,
    caller: &Scope,
    recv: &Value,
    name: &str,
    args: &[Value],
    mode: ResultMode,
) -> Result<Value, BridgeError> {
    let Some(class) = receiver_class(recv) else {
        return script_failure(
            engine,
            ScriptError::runtime(format!(
                "method call on a {} value with no class",
                recv.type_name()
            )),
        );
    };
    let Some(func) = engine.lookup_method(class.as_str(), name) else {
        return script_failure(engine, ScriptError::unknown("method", &format!("{class}.{name}")));
    };
    // The receiver rides in front of the explicit arguments.
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(recv.cheap_clone());
    full.extend(args.iter().map(Value::cheap_clone));
    dispatch(engine, caller, &func, &full, mode)
}

fn dispatch_callable(
    engine: &mut Engine,
    caller: &Scope,
    callable: &Value,
    args: &[Value],
    mode: ResultMode,
) -> Result<Value, BridgeError> {
    let func = match callable {
        Value::Obj(h) => h.borrow().as_callable().map(NativeFn::cheap_clone),
        _ => None,
    };
    match func {
        Some(func) => dispatch(engine, caller, &func, args, mode),
        None => script_failure(
            engine,
            ScriptError::runtime(format!(
                "value of type {} is not callable",
                callable.type_name()
            )),
        ),
    }
}

// ============================================================================
// Public entry points
// ============================================================================

/// Call a registered function by name, expecting one result.
pub fn call_function(
    engine: &mut Engine,
    caller: &Scope,
    name: &str,
    args: &[Value],
) -> Result<Value, BridgeError> {
    let Some(func) = engine.lookup_function(name) else {
        return script_failure(engine, ScriptError::unknown("function", name));
    };
    dispatch(engine, caller, &func, args, ResultMode::Value)
}

/// Call a registered function by name, discarding results.
pub fn call_function_void(
    engine: &mut Engine,
    caller: &Scope,
    name: &str,
    args: &[Value],
) -> Result<(), BridgeError> {
    let Some(func) = engine.lookup_function(name) else {
        return script_failure(engine, ScriptError::unknown("function", name)).map(|_| ());
    };
    dispatch(engine, caller, &func, args, ResultMode::Void).map(|_| ())
}

/// Call `name` on a receiver, expecting one result. The receiver may be a
/// class name (a string) or a record instance; it is passed to the method
/// as the leading argument.
pub fn call_method(
    engine: &mut Engine,
    caller: &Scope,
    recv: &Value,
    name: &str,
    args: &[Value],
) -> Result<Value, BridgeError> {
    dispatch_method(engine, caller, recv, name, args, ResultMode::Value)
}

/// Call `name` on a receiver, discarding results.
pub fn call_method_void(
    engine: &mut Engine,
    caller: &Scope,
    recv: &Value,
    name: &str,
    args: &[Value],
) -> Result<(), BridgeError> {
    dispatch_method(engine, caller, recv, name, args, ResultMode::Void).map(|_| ())
}

/// Invoke a callable value, expecting one result.
pub fn call_callable(
    engine: &mut Engine,
    caller: &Scope,
    callable: &Value,
    args: &[Value],
) -> Result<Value, BridgeError> {
    dispatch_callable(engine, caller, callable, args, ResultMode::Value)
}

/// Invoke a callable value, discarding results.
pub fn call_callable_void(
    engine: &mut Engine,
    caller: &Scope,
    callable: &Value,
    args: &[Value],
) -> Result<(), BridgeError> {
    dispatch_callable(engine, caller, callable, args, ResultMode::Void).map(|_| ())
}

/// Construct an instance by calling the class's `new` method.
///
/// The handle returned is retained: it stays valid after the caller's
/// scope closes, until dropped.
pub fn new_instance(
    engine: &mut Engine,
    caller: &Scope,
    class: &str,
    args: &[Value],
) -> Result<Handle, BridgeError> {
    let recv = Value::from(class);
    match dispatch_method(engine, caller, &recv, "new", args, ResultMode::Value)? {
        Value::Obj(handle) => Ok(handle),
        _ => Err(BridgeError::NotAnInstance {
            class: class.to_owned(),
        }),
    }
}

/// Call a registered function with host-form arguments and result.
///
/// Arguments are marshaled into a scope that closes when the call
/// returns; the result is marshaled back out before that happens.
pub fn call_json(
    engine: &mut Engine,
    caller: &Scope,
    name: &str,
    args: &[serde_json::Value],
) -> Result<serde_json::Value, BridgeError> {
    let arg_scope = engine.heap().open_scope();
    let script_args: Vec<Value> = args
        .iter()
        .map(|a| marshal::to_script(engine, &arg_scope, a))
        .collect();
    let result = call_function(engine, caller, name, &script_args)?;
    marshal::to_host(&result).map_err(|e| BridgeError::Marshal {
        message: e.to_string(),
    })
}

// ============================================================================
// Retained callables
// ============================================================================

/// A validated, retained reference to a callable object.
///
/// Holding one keeps the callable alive independent of any scope; dropping
/// it releases that retention. Hook tables and command handlers store
/// these.
#[derive(Debug, Clone)]
pub struct ScriptCallable {
    handle: Handle,
}

impl ScriptCallable {
    /// Retain `value` if it is a callable object.
    pub fn new(value: &Value) -> Option<Self> {
        match value {
            Value::Obj(h) if h.borrow().as_callable().is_some() => Some(ScriptCallable {
                handle: h.cheap_clone(),
            }),
            _ => None,
        }
    }

    /// Allocate a retained callable object around a native closure.
    pub fn wrap<F>(engine: &mut Engine, name: &str, arity: Option<usize>, func: F) -> Self
    where
        F: Fn(&mut Engine, &[Value]) -> Result<Value, ScriptError> + 'static,
    {
        let name = engine.intern(name);
        let wrapped: ScriptFnPtr = Rc::new(move |e, a| func(e, a).map(|v| vec![v]));
        let native = NativeFn {
            name,
            arity,
            func: wrapped,
        };
        let handle = engine.heap().alloc(ObjKind::Callable(native));
        ScriptCallable { handle }
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn as_value(&self) -> Value {
        Value::Obj(self.handle.cheap_clone())
    }

    pub fn invoke(
        &self,
        engine: &mut Engine,
        caller: &Scope,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        dispatch_callable(engine, caller, &self.as_value(), args, ResultMode::Value)
    }

    pub fn invoke_void(
        &self,
        engine: &mut Engine,
        caller: &Scope,
        args: &[Value],
    ) -> Result<(), BridgeError> {
        dispatch_callable(engine, caller, &self.as_value(), args, ResultMode::Void).map(|_| ())
    }
}

impl CheapClone for ScriptCallable {}
