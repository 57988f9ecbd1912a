//! Interpreter lifecycle: the process-wide singleton, staged
//! initialization, and the availability gate in front of the Call Bridge.
//!
//! An [`Interp`] moves through a fixed set of states:
//!
//! ```text
//! Constructed --load_bootstrap--> BootstrapLoaded --finish_init--> Ready
//!      \                                |
//!       \-- bootstrap error --> BootstrapFailed (terminal)
//!
//! any state --shutdown/Drop--> Destroyed
//! ```
//!
//! `have_config` flips on the moment the bootstrap has parsed and run; a
//! later `finish_init` failure leaves it set, so a working bootstrap stays
//! usable even when extension modules are broken. Calls through the bridge
//! while `have_config` is off fail with [`BridgeError::Unavailable`]
//! without touching the runtime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

use crate::bridge::{self, ScriptCallable};
use crate::engine::Engine;
use crate::error::{BridgeError, LifecycleError, ScriptError};
use crate::event_loop::{EventLoop, SystemClock};
use crate::heap::{Handle, Scope};
use crate::message;
use crate::platform::{DiagnosticKind, DiagnosticSink, TracingSink};
use crate::prelude::*;
use crate::value::{ObjKind, Value};

/// Version string reported by the `host.version` builtin by default.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Event loop dispatching with the interpreter as its context.
pub type HostLoop = EventLoop<Interp>;

// ============================================================================
// Singleton claim
// ============================================================================

static INTERP_ACTIVE: AtomicBool = AtomicBool::new(false);

/// RAII claim on the one process-wide interpreter slot.
#[derive(Debug)]
struct SingletonClaim;

impl SingletonClaim {
    fn acquire() -> Result<Self, LifecycleError> {
        if INTERP_ACTIVE.swap(true, Ordering::AcqRel) {
            return Err(LifecycleError::SecondInstance);
        }
        Ok(SingletonClaim)
    }
}

impl Drop for SingletonClaim {
    fn drop(&mut self) {
        INTERP_ACTIVE.store(false, Ordering::Release);
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Embedder-supplied interpreter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Directory holding stock script modules (`kernel.pr` and friends).
    pub lib_dir: PathBuf,
    /// The user's bootstrap file. `None` runs the built-in bootstrap only.
    pub config_path: Option<PathBuf>,
    /// Version string exposed to scripts.
    pub version: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            lib_dir: PathBuf::from("lib"),
            config_path: None,
            version: VERSION.to_owned(),
        }
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Constructed,
    BootstrapLoaded,
    /// Terminal: the bootstrap itself failed to parse or run.
    BootstrapFailed,
    Ready,
    Destroyed,
}

impl LifecycleState {
    pub fn name(self) -> &'static str {
        match self {
            LifecycleState::Constructed => "constructed",
            LifecycleState::BootstrapLoaded => "bootstrap-loaded",
            LifecycleState::BootstrapFailed => "bootstrap-failed",
            LifecycleState::Ready => "ready",
            LifecycleState::Destroyed => "destroyed",
        }
    }
}

/// Stock bootstrap, always run before any user bootstrap file.
const BOOTSTRAP: &str = "\
# stock defaults; a user bootstrap may override these before modules load
set startup.banner perch
set startup.debug false
";

/// Message field names seeded into the legacy variable slots and the
/// `message.fields` list.
pub const MESSAGE_FIELDS: &[&str] = &[
    "id",
    "kind",
    "thread",
    "recipient",
    "sender",
    "realm",
    "opcode",
    "signature",
    "body",
    "timestamp",
    "host",
];

/// The embedded interpreter. At most one exists per process.
pub struct Interp {
    engine: Engine,
    config: HostConfig,
    state: LifecycleState,
    have_config: bool,
    format_hook: bool,
    _claim: SingletonClaim,
}

impl Interp {
    /// Claim the singleton slot and install the native builtins. The
    /// result is in [`LifecycleState::Constructed`]; no script has run.
    pub fn construct(config: HostConfig) -> Result<Self, LifecycleError> {
        Self::construct_with_sink(config, Rc::new(TracingSink))
    }

    pub fn construct_with_sink(
        config: HostConfig,
        sink: Rc<dyn DiagnosticSink>,
    ) -> Result<Self, LifecycleError> {
        let claim = SingletonClaim::acquire()?;
        let mut engine = Engine::new(sink);
        let version = config.version.clone();
        engine.register_fn("host.version", Some(0), move |_, _| {
            Ok(Value::from(version.as_str()))
        });
        // Default announcement hook; embedders override it to surface new
        // commands in their UI.
        engine.register_fn("hooks.new_command", Some(1), |_, _| Ok(Value::Null));
        message::install(&mut engine);
        tracing::debug!(target: "perch", version = %config.version, "interpreter constructed");
        Ok(Interp {
            engine,
            config,
            state: LifecycleState::Constructed,
            have_config: false,
            format_hook: false,
            _claim: claim,
        })
    }

    /// One-call construction: bootstrap and extension load, failing on
    /// any step. Embedders that want to survive a broken extension setup
    /// use the stepwise calls instead.
    pub fn create(config: HostConfig) -> Result<Self, LifecycleError> {
        let mut interp = Self::construct(config)?;
        interp.load_bootstrap()?;
        interp.finish_init()?;
        Ok(interp)
    }

    /// Run the stock bootstrap, then the configured user bootstrap file
    /// if one is set and exists. Success turns `have_config` on.
    pub fn load_bootstrap(&mut self) -> Result<(), LifecycleError> {
        let path = self.config.config_path.clone();
        self.load_bootstrap_inner(path.as_deref())
    }

    /// Like [`load_bootstrap`](Interp::load_bootstrap) with an explicit
    /// user bootstrap file.
    pub fn load_bootstrap_from(&mut self, path: impl AsRef<Path>) -> Result<(), LifecycleError> {
        let path = path.as_ref().to_owned();
        self.config.config_path = Some(path.clone());
        self.load_bootstrap_inner(Some(&path))
    }

    fn load_bootstrap_inner(&mut self, user_file: Option<&Path>) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Constructed)?;
        match self.run_bootstrap(user_file) {
            Ok(()) => {
                self.have_config = true;
                self.state = LifecycleState::BootstrapLoaded;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                self.state = LifecycleState::BootstrapFailed;
                self.engine
                    .sink()
                    .report(DiagnosticKind::ScriptError, &message);
                Err(LifecycleError::Bootstrap { message })
            }
        }
    }

    fn run_bootstrap(&mut self, user_file: Option<&Path>) -> Result<(), ScriptError> {
        self.engine.load_source("<bootstrap>", BOOTSTRAP)?;
        match user_file {
            Some(path) if path.exists() => {
                let bytes = std::fs::read(path).map_err(|e| {
                    ScriptError::module(format!("cannot read {}: {e}", path.display()))
                })?;
                let text = self.engine.text_from_bytes(&bytes);
                self.engine
                    .load_source(&path.display().to_string(), text.as_str())?;
            }
            Some(path) => {
                tracing::debug!(target: "perch", path = %path.display(), "no user bootstrap file");
            }
            None => {}
        }
        Ok(())
    }

    /// Load the extension layer: seed the legacy variable slots, put the
    /// configured library directory on the search path, and load the
    /// `kernel` module. A failure here is reported and returned, but the
    /// bootstrap remains usable and the call may be retried.
    pub fn finish_init(&mut self) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::BootstrapLoaded)?;
        self.install_legacy_slots();
        let lib_dir = self.config.lib_dir.clone();
        self.engine.push_front_search_dir(lib_dir);
        if let Err(err) = self.engine.load_module("kernel") {
            let message = err.to_string();
            self.engine
                .sink()
                .report(DiagnosticKind::ScriptError, &message);
            return Err(LifecycleError::Extension { message });
        }
        self.format_hook = self.engine.has_function("format_message");
        self.state = LifecycleState::Ready;
        tracing::debug!(target: "perch", format_hook = self.format_hook, "interpreter ready");
        Ok(())
    }

    /// Seed the compatibility globals older embedder scripts read. A user
    /// bootstrap that already set one of them wins.
    fn install_legacy_slots(&mut self) {
        for field in MESSAGE_FIELDS {
            self.engine
                .ensure_global(&format!("message.{field}"), Value::Null);
        }
        let names: Vec<Value> = MESSAGE_FIELDS.iter().map(|f| Value::from(*f)).collect();
        let fields = self.engine.heap().alloc(ObjKind::List(names));
        self.engine.ensure_global("message.fields", Value::Obj(fields));
        let path_value = match &self.config.config_path {
            Some(p) => Value::from(p.display().to_string()),
            None => Value::Null,
        };
        self.engine.ensure_global("config.path", path_value);
        let version = self.config.version.clone();
        self.engine.ensure_global("version", Value::from(version));
    }

    /// Tear down the runtime. Registries drop so retained callables
    /// release their state; the singleton slot frees when the value is
    /// dropped.
    pub fn shutdown(&mut self) {
        if self.state == LifecycleState::Destroyed {
            return;
        }
        self.engine.teardown();
        self.have_config = false;
        self.format_hook = false;
        self.state = LifecycleState::Destroyed;
        tracing::debug!(target: "perch", "interpreter destroyed");
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<(), LifecycleError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState {
                expected: expected.name(),
                actual: self.state.name(),
            })
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Whether a bootstrap has loaded successfully. This is the
    /// availability gate for everything that calls into script.
    pub fn have_config(&self) -> bool {
        self.have_config
    }

    /// Whether the extension layer provides a `format_message` hook.
    pub fn has_format_hook(&self) -> bool {
        self.format_hook
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Direct engine access for embedders registering their own natives.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Build an event loop whose iteration scopes account against this
    /// interpreter's heap.
    pub fn make_loop(&self) -> HostLoop {
        EventLoop::with_parts(
            self.engine.heap().clone(),
            Rc::new(SystemClock::new()),
            self.engine.sink().clone(),
        )
    }

    // ------------------------------------------------------------------
    // Gated bridge surface
    // ------------------------------------------------------------------

    fn ensure_available(&self) -> Result<(), BridgeError> {
        if self.have_config {
            Ok(())
        } else {
            Err(BridgeError::Unavailable)
        }
    }

    pub fn call_function(
        &mut self,
        scope: &Scope,
        name: &str,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        self.ensure_available()?;
        bridge::call_function(&mut self.engine, scope, name, args)
    }

    pub fn call_function_void(
        &mut self,
        scope: &Scope,
        name: &str,
        args: &[Value],
    ) -> Result<(), BridgeError> {
        self.ensure_available()?;
        bridge::call_function_void(&mut self.engine, scope, name, args)
    }

    pub fn call_method(
        &mut self,
        scope: &Scope,
        recv: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        self.ensure_available()?;
        bridge::call_method(&mut self.engine, scope, recv, name, args)
    }

    pub fn call_method_void(
        &mut self,
        scope: &Scope,
        recv: &Value,
        name: &str,
        args: &[Value],
    ) -> Result<(), BridgeError> {
        self.ensure_available()?;
        bridge::call_method_void(&mut self.engine, scope, recv, name, args)
    }

    pub fn invoke_callable(
        &mut self,
        scope: &Scope,
        callable: &ScriptCallable,
        args: &[Value],
    ) -> Result<Value, BridgeError> {
        self.ensure_available()?;
        callable.invoke(&mut self.engine, scope, args)
    }

    pub fn invoke_callable_void(
        &mut self,
        scope: &Scope,
        callable: &ScriptCallable,
        args: &[Value],
    ) -> Result<(), BridgeError> {
        self.ensure_available()?;
        callable.invoke_void(&mut self.engine, scope, args)
    }

    /// Construct a retained instance of a script-visible class.
    pub fn new_instance(
        &mut self,
        scope: &Scope,
        class: &str,
        args: &[Value],
    ) -> Result<Handle, BridgeError> {
        self.ensure_available()?;
        bridge::new_instance(&mut self.engine, scope, class, args)
    }

    /// Call a function with host-form arguments and result.
    pub fn call_json(
        &mut self,
        scope: &Scope,
        name: &str,
        args: &[serde_json::Value],
    ) -> Result<serde_json::Value, BridgeError> {
        self.ensure_available()?;
        bridge::call_json(&mut self.engine, scope, name, args)
    }

    // ------------------------------------------------------------------
    // Snippets and hooks
    // ------------------------------------------------------------------

    /// Execute one directive line on behalf of interactive input.
    ///
    /// `None` means scripting is unavailable. Errors are reported to the
    /// sink and swallowed; the caller sees empty output.
    pub fn run_snippet(&mut self, line: &str) -> Option<String> {
        if !self.have_config {
            return None;
        }
        match self.engine.eval_line(line) {
            Ok(value) => Some(value.to_text()),
            Err(err) => {
                self.engine
                    .sink()
                    .report(DiagnosticKind::ScriptError, &err.to_string());
                Some(String::new())
            }
        }
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.engine.has_function(name)
    }

    /// Invoke a hook function if it exists. `Ok(false)` means no such
    /// hook is defined, which is not an error.
    pub fn call_hook(
        &mut self,
        scope: &Scope,
        hook: &str,
        args: &[Value],
    ) -> Result<bool, BridgeError> {
        self.ensure_available()?;
        if !self.engine.has_function(hook) {
            return Ok(false);
        }
        bridge::call_function_void(&mut self.engine, scope, hook, args)?;
        Ok(true)
    }

    /// Render a message through the `format_message` hook, if the
    /// extension layer provides one.
    pub fn format_message(
        &mut self,
        scope: &Scope,
        message: &Value,
    ) -> Result<Option<String>, BridgeError> {
        self.ensure_available()?;
        if !self.format_hook {
            return Ok(None);
        }
        let out =
            bridge::call_function(&mut self.engine, scope, "format_message", std::slice::from_ref(message))?;
        Ok(Some(out.to_text()))
    }
}

impl Drop for Interp {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Interp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interp")
            .field("state", &self.state)
            .field("have_config", &self.have_config)
            .field("format_hook", &self.format_hook)
            .finish_non_exhaustive()
    }
}
