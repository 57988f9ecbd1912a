//! Script-side value representation.
//!
//! Scalars (`Null`, `Bool`, `Int`, `Float`, `Str`) are inline; sequences,
//! mappings, records, and callables live on the [`Heap`](crate::heap::Heap)
//! and are referenced through [`Handle`]s.

use std::borrow::Borrow;

use crate::engine::Engine;
use crate::error::ScriptError;
use crate::heap::Handle;
use crate::prelude::*;

/// Marker trait for types whose `Clone` is a reference-count bump or a
/// small copy. Calling `cheap_clone` documents that no deep copy happens.
pub trait CheapClone: Clone {
    fn cheap_clone(&self) -> Self {
        self.clone()
    }
}

// ============================================================================
// ScriptStr - immutable shared string
// ============================================================================

/// Immutable shared string. Cloning bumps a reference count; identical
/// interned strings share one allocation (see [`crate::intern::NameTable`]).
#[derive(Clone)]
pub struct ScriptStr(Rc<str>);

impl CheapClone for ScriptStr {}

impl ScriptStr {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Pointer identity, used by tests to verify interning.
    pub fn ptr_eq(a: &ScriptStr, b: &ScriptStr) -> bool {
        Rc::ptr_eq(&a.0, &b.0)
    }
}

impl From<&str> for ScriptStr {
    fn from(s: &str) -> Self {
        ScriptStr(Rc::from(s))
    }
}

impl From<String> for ScriptStr {
    fn from(s: String) -> Self {
        ScriptStr(Rc::from(s.as_str()))
    }
}

impl Borrow<str> for ScriptStr {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq for ScriptStr {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0) || self.0 == other.0
    }
}

impl Eq for ScriptStr {}

impl PartialEq<&str> for ScriptStr {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl std::hash::Hash for ScriptStr {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl fmt::Display for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ScriptStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}

// ============================================================================
// Value - the script value type
// ============================================================================

/// A script runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(ScriptStr),
    Obj(Handle),
}

impl CheapClone for Value {}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Obj(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness: null, false, zero, and the empty string are false;
    /// everything else (objects included) is true.
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) => true,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(n) => Some(*n),
            Value::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_obj(&self) -> Option<&Handle> {
        match self {
            Value::Obj(h) => Some(h),
            _ => None,
        }
    }

    /// Best-effort text rendering, used by snippet execution and command
    /// output. Objects render as a short tag, not their contents.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Str(s) => s.as_str().to_owned(),
            Value::Obj(h) => h.borrow().describe(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(ScriptStr::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(ScriptStr::from(s))
    }
}

impl From<ScriptStr> for Value {
    fn from(s: ScriptStr) -> Self {
        Value::Str(s)
    }
}

impl From<Handle> for Value {
    fn from(h: Handle) -> Self {
        Value::Obj(h)
    }
}

// ============================================================================
// Heap object bodies
// ============================================================================

/// Signature of a native callable registered with the engine.
///
/// Returns the raw result list; the Call Bridge enforces the result-arity
/// contract on top of this. Functions registered through
/// [`Engine::register_fn`](crate::engine::Engine::register_fn) always
/// produce exactly one result.
pub type ScriptFnPtr = Rc<dyn Fn(&mut Engine, &[Value]) -> Result<Vec<Value>, ScriptError>>;

/// A named native callable with an optional declared parameter count.
///
/// When `arity` is `Some(n)` the engine rejects invocations with a
/// different argument count as a runtime error before calling `func`.
#[derive(Clone)]
pub struct NativeFn {
    pub name: ScriptStr,
    pub arity: Option<usize>,
    pub func: ScriptFnPtr,
}

impl CheapClone for NativeFn {}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFn")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

/// The body of a heap object.
#[derive(Debug)]
pub enum ObjKind {
    /// Ordered sequence.
    List(Vec<Value>),
    /// String-keyed mapping. Insertion order is kept internally but is not
    /// part of the marshaling contract.
    Map(IndexMap<ScriptStr, Value>),
    /// A record-like object with a class tag, used for native-owned data
    /// (messages, list models) exposed opaquely to script code.
    Record {
        class: ScriptStr,
        fields: IndexMap<ScriptStr, Value>,
    },
    /// A callable value.
    Callable(NativeFn),
}

/// Heap object storage; accessed through [`Handle::borrow`] /
/// [`Handle::borrow_mut`].
#[derive(Debug)]
pub struct ObjBody {
    pub kind: ObjKind,
}

impl ObjBody {
    pub fn new(kind: ObjKind) -> Self {
        ObjBody { kind }
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            ObjKind::List(_) => "list",
            ObjKind::Map(_) => "map",
            ObjKind::Record { .. } => "record",
            ObjKind::Callable(_) => "callable",
        }
    }

    /// Short tag used when rendering an object as text.
    pub fn describe(&self) -> String {
        match &self.kind {
            ObjKind::List(items) => format!("<list[{}]>", items.len()),
            ObjKind::Map(entries) => format!("<map{{{}}}>", entries.len()),
            ObjKind::Record { class, .. } => format!("<{class}>"),
            ObjKind::Callable(f) => format!("<callable {}>", f.name),
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Value>> {
        match &self.kind {
            ObjKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_list_mut(&mut self) -> Option<&mut Vec<Value>> {
        match &mut self.kind {
            ObjKind::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<ScriptStr, Value>> {
        match &self.kind {
            ObjKind::Map(entries) => Some(entries),
            _ => None,
        }
    }

    /// Record field lookup; `None` for non-records and missing fields.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match &self.kind {
            ObjKind::Record { fields, .. } => fields.get(name),
            _ => None,
        }
    }

    pub fn record_class(&self) -> Option<&ScriptStr> {
        match &self.kind {
            ObjKind::Record { class, .. } => Some(class),
            _ => None,
        }
    }

    pub fn as_callable(&self) -> Option<&NativeFn> {
        match &self.kind {
            ObjKind::Callable(f) => Some(f),
            _ => None,
        }
    }
}
