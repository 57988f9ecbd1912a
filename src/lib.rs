//! An embeddable scripting-bridge core with a cooperative event loop.
//!
//! perch gives a host application a script runtime it can delegate
//! behavior to. Values marshal across the boundary and calls go through
//! a bridge with strict error discipline; deferred work runs on a
//! single-active event loop. The runtime executes a line-oriented
//! directive language (see [`engine`]) sufficient for bootstrap files and
//! extension modules; everything behavioral is native callables the host
//! registers.
//!
//! The pieces:
//!
//! * [`value`] and [`heap`]: script values, handle scopes, and the
//!   mortal/retained lifetime split;
//! * [`marshal`]: conversion to and from the host interchange form;
//! * [`engine`]: registries, globals, the error slot, module loading;
//! * [`bridge`]: the call protocol, with one diagnostic per failure, a
//!   cleared error slot, and a fatal check on the one-result contract;
//! * [`host`]: the interpreter singleton and its staged lifecycle;
//! * [`event_loop`]: tasks, timers, and watches under one cooperative
//!   loop;
//! * [`command`], [`message`], [`context`], [`buddylist`]: the
//!   embedder-facing models built on top.
//!
//! # Quick start
//!
//! ```
//! use perch::{HostConfig, Interp};
//!
//! let mut interp = Interp::construct(HostConfig::default())?;
//! interp.load_bootstrap()?;
//! assert_eq!(
//!     interp.run_snippet("get startup.banner"),
//!     Some("perch".to_owned()),
//! );
//! # Ok::<(), perch::LifecycleError>(())
//! ```

pub mod bridge;
pub mod buddylist;
pub mod command;
pub mod context;
pub mod engine;
pub mod error;
pub mod event_loop;
pub mod heap;
pub mod host;
pub mod intern;
pub mod marshal;
pub mod message;
pub mod platform;
mod prelude;
pub mod value;

pub use bridge::ScriptCallable;
pub use buddylist::BuddyList;
pub use command::{Command, CommandKind, CommandRegistry, TextCallback};
pub use context::Context;
pub use engine::Engine;
pub use error::{BridgeError, CommandError, LifecycleError, LoopError, ScriptError};
pub use event_loop::{
    Clock, EventLoop, ManualClock, Priority, SystemClock, Task, TimerId, Waker, WatchId,
};
pub use heap::{Handle, Heap, HeapStats, Scope};
pub use host::{HostConfig, HostLoop, Interp, LifecycleState, MESSAGE_FIELDS, VERSION};
pub use message::{Message, MessageList};
pub use platform::{DiagnosticKind, DiagnosticSink, NullSink, RecordingSink, TracingSink};
pub use value::{CheapClone, NativeFn, ObjBody, ObjKind, ScriptFnPtr, ScriptStr, Value};
