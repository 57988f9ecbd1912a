//! Name interning for identifiers and mapping keys.
//!
//! Identical names share one `Rc<str>` allocation, so key comparison in the
//! hot lookup maps is usually a pointer check.

use rustc_hash::FxHashMap;

use crate::value::{CheapClone, ScriptStr};

/// Interning table for [`ScriptStr`] names.
///
/// Names inserted into the table are stored once; later requests for the
/// same text return a cheap clone of the shared instance.
pub struct NameTable {
    /// Box<str> key avoids double indirection through Rc.
    names: FxHashMap<Box<str>, ScriptStr>,
}

impl NameTable {
    pub fn new() -> Self {
        Self {
            names: FxHashMap::default(),
        }
    }

    /// Create a table pre-populated with names the runtime touches often.
    pub fn with_common_names() -> Self {
        let mut table = Self::new();
        for s in COMMON_NAMES {
            table.get_or_intern(s);
        }
        table
    }

    /// Get an existing name or intern a new one.
    pub fn get_or_intern(&mut self, s: &str) -> ScriptStr {
        if let Some(existing) = self.names.get(s) {
            return existing.cheap_clone();
        }
        let name = ScriptStr::from(s);
        self.names.insert(s.into(), name.cheap_clone());
        name
    }

    /// Look up without interning.
    pub fn get(&self, s: &str) -> Option<ScriptStr> {
        self.names.get(s).map(|n| n.cheap_clone())
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Names that recur in bootstrap sources, method dispatch, and the legacy
/// variable slots.
const COMMON_NAMES: &[&str] = &[
    // Method dispatch
    "new",
    "get_size",
    "get_by_id",
    "add_message",
    "expunge",
    "delete_by_id",
    "iterate_begin",
    "iterate_next",
    "iterate_done",
    // Host bindings
    "host.version",
    "hooks.new_command",
    "hooks.receive_message",
    "hooks.new_message",
    "format_message",
    // Legacy variable slots
    "message.id",
    "message.kind",
    "message.thread",
    "message.recipient",
    "message.sender",
    "message.realm",
    "message.opcode",
    "message.signature",
    "message.body",
    "message.timestamp",
    "message.host",
    "message.fields",
    "config.path",
    // Record fields
    "id",
    "kind",
    "sender",
    "recipient",
    "body",
    "deleted",
    "items",
    "iter_pos",
    "iter_reverse",
    "iter_active",
    // Classes
    "message",
    "message_list",
];
