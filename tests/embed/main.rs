//! Integration tests for the embedding surface, organized by concern.
//!
//! These tests exercise the interpreter through the public API the way a
//! host application would: staged lifecycle, gated bridge calls, the
//! event loop, and the models built on top.
//!
//! At most one [`Interp`] exists per process, so every test that
//! constructs one holds [`interp_lock`] for its whole body. The lock is
//! recovered from poisoning because the fatal-contract tests panic on
//! purpose while holding it.

mod bridge_calls;
mod commands;
mod messages;
mod pump;

use std::path::PathBuf;
use std::rc::Rc;
use std::sync::{Mutex, MutexGuard, PoisonError};

use perch::{HostConfig, Interp, RecordingSink};
use tempfile::TempDir;

static INTERP_LOCK: Mutex<()> = Mutex::new(());

/// Serialize interpreter construction across the test binary.
pub fn interp_lock() -> MutexGuard<'static, ()> {
    INTERP_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A minimal extension module; enough for `finish_init` to succeed.
pub const PLAIN_KERNEL: &str = "# stock extension layer\nset kernel.loaded true\n";

/// Create a library directory holding a `kernel.pr` with `body`.
pub fn lib_dir_with_kernel(body: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("kernel.pr"), body).unwrap();
    dir
}

pub fn config_for(dir: &TempDir) -> HostConfig {
    HostConfig {
        lib_dir: dir.path().to_path_buf(),
        ..HostConfig::default()
    }
}

pub fn config_with_bootstrap(dir: &TempDir, bootstrap: PathBuf) -> HostConfig {
    HostConfig {
        lib_dir: dir.path().to_path_buf(),
        config_path: Some(bootstrap),
        ..HostConfig::default()
    }
}

/// A fully initialized interpreter over a throwaway library directory,
/// with a recording sink for diagnostic assertions.
pub fn ready_interp() -> (Interp, Rc<RecordingSink>, TempDir) {
    let dir = lib_dir_with_kernel(PLAIN_KERNEL);
    let sink = Rc::new(RecordingSink::new());
    let mut interp = Interp::construct_with_sink(config_for(&dir), sink.clone()).unwrap();
    interp.load_bootstrap().unwrap();
    interp.finish_init().unwrap();
    (interp, sink, dir)
}
