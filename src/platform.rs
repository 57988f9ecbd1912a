//! Host integration seams.
//!
//! The diagnostic sink is the one-way channel for conditions the core
//! recovers from on its own: captured script errors, invalid text crossing
//! the boundary, and rejected loop entry. Reporting never calls back into
//! the bridge.

use crate::prelude::*;

/// Classifies a diagnostic for the host reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// A script-raised error that was captured and cleared.
    ScriptError,
    /// Non-UTF-8 text was substituted while crossing the boundary.
    InvalidText,
    /// An event loop entry point was misused (reentrant `run`).
    LoopMisuse,
}

/// Trait for receiving diagnostics from the core.
///
/// Implementations must not call back into the bridge or the event loop;
/// a report is a notification, not a request.
pub trait DiagnosticSink {
    fn report(&self, kind: DiagnosticKind, message: &str);
}

/// Default sink: forwards to `tracing`.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn report(&self, kind: DiagnosticKind, message: &str) {
        match kind {
            DiagnosticKind::ScriptError => tracing::error!(target: "perch", "{message}"),
            DiagnosticKind::InvalidText => tracing::warn!(target: "perch", "{message}"),
            DiagnosticKind::LoopMisuse => tracing::warn!(target: "perch", "{message}"),
        }
    }
}

/// A sink that discards all diagnostics.
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn report(&self, _kind: DiagnosticKind, _message: &str) {}
}

/// A sink that records diagnostics in memory. Single-threaded, intended for
/// tests asserting on what was reported and how often.
#[derive(Default)]
pub struct RecordingSink {
    entries: RefCell<Vec<(DiagnosticKind, String)>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<(DiagnosticKind, String)> {
        self.entries.borrow().clone()
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.entries.borrow().iter().filter(|(k, _)| *k == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

impl DiagnosticSink for RecordingSink {
    fn report(&self, kind: DiagnosticKind, message: &str) {
        self.entries.borrow_mut().push((kind, message.to_owned()));
    }
}
