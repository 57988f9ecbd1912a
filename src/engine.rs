//! The script engine: registries, globals, the error slot, and source
//! loading.
//!
//! The engine executes a line-oriented directive language. Each non-blank,
//! non-`#` line is one directive:
//!
//! ```text
//! # comment
//! set NAME VALUE          assign a global
//! get NAME                read a global
//! use MODULE              load MODULE.pr from the search path (once)
//! call FUNCTION [ARGS..]  invoke a registered function
//! ```
//!
//! Values are literals: `null`, `true`, `false`, integers, floats, bare
//! words, or double-quoted strings with `\n` `\t` `\"` `\\` escapes.
//!
//! Errors raised while *loading* source propagate to the loader as `Result`.
//! Errors raised by a callable invoked through [`Engine::run_catching`] land
//! in the error slot instead; that is the capture point the Call Bridge
//! inspects after every invocation.

use std::path::PathBuf;

use crate::error::ScriptError;
use crate::heap::Heap;
use crate::intern::NameTable;
use crate::marshal;
use crate::platform::DiagnosticSink;
use crate::prelude::*;
use crate::value::{CheapClone, NativeFn, ScriptFnPtr, ScriptStr, Value};

/// Extension of module source files on the search path.
pub const MODULE_EXT: &str = "pr";

// ============================================================================
// Classes
// ============================================================================

/// A named method set, dispatched by the receiver's class name.
#[derive(Debug, Default)]
pub struct ClassDef {
    methods: FxHashMap<ScriptStr, NativeFn>,
}

impl ClassDef {
    pub fn method(&self, name: &str) -> Option<&NativeFn> {
        self.methods.get(name)
    }

    pub fn method_names(&self) -> impl Iterator<Item = &ScriptStr> {
        self.methods.keys()
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Registries and state for one script runtime.
pub struct Engine {
    heap: Heap,
    names: NameTable,
    globals: FxHashMap<ScriptStr, Value>,
    functions: FxHashMap<ScriptStr, NativeFn>,
    classes: FxHashMap<ScriptStr, ClassDef>,
    /// The error slot. Set when a catching invocation raises; inspected and
    /// cleared by the Call Bridge after every call.
    error_slot: Option<ScriptError>,
    search_path: Vec<PathBuf>,
    loaded_modules: FxHashSet<String>,
    sink: Rc<dyn DiagnosticSink>,
}

impl Engine {
    pub fn new(sink: Rc<dyn DiagnosticSink>) -> Self {
        Engine {
            heap: Heap::new(),
            names: NameTable::with_common_names(),
            globals: FxHashMap::default(),
            functions: FxHashMap::default(),
            classes: FxHashMap::default(),
            error_slot: None,
            search_path: Vec::new(),
            loaded_modules: FxHashSet::default(),
            sink,
        }
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn sink(&self) -> &Rc<dyn DiagnosticSink> {
        &self.sink
    }

    pub fn intern(&mut self, name: &str) -> ScriptStr {
        self.names.get_or_intern(name)
    }

    /// Admit text from raw bytes, reporting invalid UTF-8 to the sink.
    pub fn text_from_bytes(&self, bytes: &[u8]) -> ScriptStr {
        marshal::text_from_bytes(self.sink.as_ref(), bytes)
    }

    // ------------------------------------------------------------------
    // Globals
    // ------------------------------------------------------------------

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.names.get_or_intern(name);
        self.globals.insert(key, value);
    }

    /// Assign a global only if it is not already set. Used for defaults
    /// that user modules are allowed to override before installation.
    pub fn ensure_global(&mut self, name: &str, value: Value) {
        if !self.globals.contains_key(name) {
            self.set_global(name, value);
        }
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).map(Value::cheap_clone)
    }

    // ------------------------------------------------------------------
    // Functions and classes
    // ------------------------------------------------------------------

    /// Register a single-result native function.
    pub fn register_fn<F>(&mut self, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&mut Engine, &[Value]) -> Result<Value, ScriptError> + 'static,
    {
        let wrapped: ScriptFnPtr = Rc::new(move |engine, args| func(engine, args).map(|v| vec![v]));
        self.register_raw_fn(name, arity, wrapped);
    }

    /// Register a native function returning a raw result list. Most
    /// callables should go through [`register_fn`](Engine::register_fn);
    /// this exists so tests can model bindings that violate the one-result
    /// contract.
    pub fn register_raw_fn(&mut self, name: &str, arity: Option<usize>, func: ScriptFnPtr) {
        let key = self.names.get_or_intern(name);
        let native = NativeFn {
            name: key.cheap_clone(),
            arity,
            func,
        };
        self.functions.insert(key, native);
    }

    pub fn register_class(&mut self, name: &str) {
        let key = self.names.get_or_intern(name);
        self.classes.entry(key).or_default();
    }

    pub fn register_method<F>(&mut self, class: &str, name: &str, arity: Option<usize>, func: F)
    where
        F: Fn(&mut Engine, &[Value]) -> Result<Value, ScriptError> + 'static,
    {
        let class_key = self.names.get_or_intern(class);
        let method_key = self.names.get_or_intern(name);
        let wrapped: ScriptFnPtr = Rc::new(move |engine, args| func(engine, args).map(|v| vec![v]));
        let native = NativeFn {
            name: method_key.cheap_clone(),
            arity,
            func: wrapped,
        };
        self.classes
            .entry(class_key)
            .or_default()
            .methods
            .insert(method_key, native);
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn has_method(&self, class: &str, name: &str) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.methods.contains_key(name))
    }

    pub fn lookup_function(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).map(NativeFn::cheap_clone)
    }

    pub fn lookup_method(&self, class: &str, name: &str) -> Option<NativeFn> {
        self.classes
            .get(class)
            .and_then(|c| c.methods.get(name))
            .map(NativeFn::cheap_clone)
    }

    // ------------------------------------------------------------------
    // Invocation and the error slot
    // ------------------------------------------------------------------

    /// Invoke `func`, trapping any raised error in the error slot.
    ///
    /// On success the raw result list is returned. On failure the list is
    /// empty and the slot holds the error until someone clears it; callers
    /// that need the error-or-results distinction must check the slot, not
    /// the list length.
    pub fn run_catching(&mut self, func: &NativeFn, args: &[Value]) -> Vec<Value> {
        match self.call_now(func, args) {
            Ok(results) => results,
            Err(err) => {
                self.set_error(err);
                Vec::new()
            }
        }
    }

    fn call_now(&mut self, func: &NativeFn, args: &[Value]) -> Result<Vec<Value>, ScriptError> {
        if let Some(expected) = func.arity {
            if args.len() != expected {
                return Err(ScriptError::arity(func.name.as_str(), expected, args.len()));
            }
        }
        (func.func)(self, args)
    }

    pub fn set_error(&mut self, err: ScriptError) {
        self.error_slot = Some(err);
    }

    /// Take and clear the error slot.
    pub fn take_error(&mut self) -> Option<ScriptError> {
        self.error_slot.take()
    }

    pub fn has_error(&self) -> bool {
        self.error_slot.is_some()
    }

    // ------------------------------------------------------------------
    // Source loading
    // ------------------------------------------------------------------

    /// Prepend a directory to the module search path. Directories added
    /// later are searched first, so an embedder's own library directory
    /// can shadow stock modules. Re-adding a directory moves it to the
    /// front instead of duplicating it.
    pub fn push_front_search_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        self.search_path.retain(|d| d != &dir);
        self.search_path.insert(0, dir);
    }

    pub fn search_path(&self) -> &[PathBuf] {
        &self.search_path
    }

    /// Execute directive source. `origin` names the source in parse errors.
    pub fn load_source(&mut self, origin: &str, source: &str) -> Result<(), ScriptError> {
        for (idx, line) in source.lines().enumerate() {
            let line_no = idx as u32 + 1;
            let directive = parse_directive(line)
                .map_err(|msg| ScriptError::parse_at(origin, line_no, msg))?;
            if let Some(directive) = directive {
                self.exec_directive(directive)?;
            }
        }
        Ok(())
    }

    /// Load `NAME.pr` from the search path, once per engine. A second load
    /// of the same name is a no-op even if the first one failed partway; a
    /// failed load can be retried because the name is only recorded while
    /// the load is in flight or after it succeeded.
    pub fn load_module(&mut self, name: &str) -> Result<(), ScriptError> {
        if self.loaded_modules.contains(name) {
            return Ok(());
        }
        let path = self.find_module(name).ok_or_else(|| {
            ScriptError::module(format!("cannot locate module `{name}` on the search path"))
        })?;
        let source = std::fs::read_to_string(&path)
            .map_err(|e| ScriptError::module(format!("cannot read {}: {e}", path.display())))?;
        tracing::debug!(target: "perch", module = name, path = %path.display(), "loading module");
        // Mark before executing so a module that (transitively) uses itself
        // does not recurse.
        self.loaded_modules.insert(name.to_owned());
        let origin = path.display().to_string();
        if let Err(err) = self.load_source(&origin, &source) {
            self.loaded_modules.remove(name);
            return Err(err);
        }
        Ok(())
    }

    pub fn is_module_loaded(&self, name: &str) -> bool {
        self.loaded_modules.contains(name)
    }

    fn find_module(&self, name: &str) -> Option<PathBuf> {
        let file = format!("{name}.{MODULE_EXT}");
        self.search_path
            .iter()
            .map(|dir| dir.join(&file))
            .find(|p| p.is_file())
    }

    /// Parse and execute a single directive line, returning its value:
    /// the global for `get`, the first result for `call`, null otherwise.
    pub fn eval_line(&mut self, line: &str) -> Result<Value, ScriptError> {
        let directive = parse_directive(line)
            .map_err(|msg| ScriptError::parse_at("<snippet>", 1, msg))?;
        match directive {
            Some(directive) => self.exec_directive(directive),
            None => Ok(Value::Null),
        }
    }

    fn exec_directive(&mut self, directive: Directive) -> Result<Value, ScriptError> {
        match directive {
            Directive::Set { name, value } => {
                self.set_global(&name, value);
                Ok(Value::Null)
            }
            Directive::Get { name } => self
                .global(&name)
                .ok_or_else(|| ScriptError::unknown("global", &name)),
            Directive::Use { module } => {
                self.load_module(&module)?;
                Ok(Value::Null)
            }
            Directive::Call { name, args } => {
                let func = self
                    .lookup_function(&name)
                    .ok_or_else(|| ScriptError::unknown("function", &name))?;
                let results = self.call_now(&func, &args)?;
                Ok(results.into_iter().next().unwrap_or(Value::Null))
            }
        }
    }

    /// Drop every registry. Called on interpreter destruction so callables
    /// holding host state release it deterministically.
    pub fn teardown(&mut self) {
        self.globals.clear();
        self.functions.clear();
        self.classes.clear();
        self.loaded_modules.clear();
        self.error_slot = None;
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("globals", &self.globals.len())
            .field("functions", &self.functions.len())
            .field("classes", &self.classes.len())
            .field("error_slot", &self.error_slot)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Directive parsing
// ============================================================================

#[derive(Debug)]
enum Directive {
    Set { name: String, value: Value },
    Get { name: String },
    Use { module: String },
    Call { name: String, args: Vec<Value> },
}

struct Token {
    text: String,
    quoted: bool,
}

fn tokenize(line: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut text = String::new();
            loop {
                match chars.next() {
                    None => return Err("unterminated string literal".to_owned()),
                    Some('"') => break,
                    Some('\\') => match chars.next() {
                        Some('n') => text.push('\n'),
                        Some('t') => text.push('\t'),
                        Some('"') => text.push('"'),
                        Some('\\') => text.push('\\'),
                        Some(other) => return Err(format!("unknown escape: \\{other}")),
                        None => return Err("unterminated string literal".to_owned()),
                    },
                    Some(other) => text.push(other),
                }
            }
            tokens.push(Token { text, quoted: true });
        } else {
            let mut text = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                text.push(c);
                chars.next();
            }
            tokens.push(Token {
                text,
                quoted: false,
            });
        }
    }
    Ok(tokens)
}

fn literal(token: &Token) -> Value {
    if token.quoted {
        return Value::Str(ScriptStr::from(token.text.as_str()));
    }
    match token.text.as_str() {
        "null" => Value::Null,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        text => {
            if let Ok(n) = text.parse::<i64>() {
                Value::Int(n)
            } else if let Ok(f) = text.parse::<f64>() {
                Value::Float(f)
            } else {
                Value::Str(ScriptStr::from(text))
            }
        }
    }
}

fn parse_directive(line: &str) -> Result<Option<Directive>, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }
    let tokens = tokenize(trimmed)?;
    let Some((head, rest)) = tokens.split_first() else {
        return Ok(None);
    };
    if head.quoted {
        return Err("directive keyword cannot be quoted".to_owned());
    }
    match head.text.as_str() {
        "set" => match rest {
            [name, value] if !name.quoted => Ok(Some(Directive::Set {
                name: name.text.clone(),
                value: literal(value),
            })),
            _ => Err("usage: set NAME VALUE".to_owned()),
        },
        "get" => match rest {
            [name] if !name.quoted => Ok(Some(Directive::Get {
                name: name.text.clone(),
            })),
            _ => Err("usage: get NAME".to_owned()),
        },
        "use" => match rest {
            [module] if !module.quoted => Ok(Some(Directive::Use {
                module: module.text.clone(),
            })),
            _ => Err("usage: use MODULE".to_owned()),
        },
        "call" => match rest.split_first() {
            Some((name, args)) if !name.quoted => Ok(Some(Directive::Call {
                name: name.text.clone(),
                args: args.iter().map(literal).collect(),
            })),
            _ => Err("usage: call FUNCTION [ARGS...]".to_owned()),
        },
        other => Err(format!("unknown directive: {other}")),
    }
}
