//! Activity contexts: where the embedder currently is, as a bitmask.
//!
//! Hooks and commands can be restricted to contexts; a restriction
//! matches when any of its bits is active in the current mode.

/// The embedder's current interaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    mode: u32,
}

impl Context {
    pub const STARTUP: u32 = 1 << 0;
    pub const READCONFIG: u32 = 1 << 1;
    pub const INTERACTIVE: u32 = 1 << 2;
    pub const RECV: u32 = 1 << 3;
    pub const EDIT: u32 = 1 << 4;
    pub const POPUP: u32 = 1 << 5;
    /// Matches every context.
    pub const ANY: u32 = u32::MAX;

    pub fn new(mode: u32) -> Self {
        Context { mode }
    }

    pub fn mode(self) -> u32 {
        self.mode
    }

    pub fn set_mode(&mut self, mode: u32) {
        self.mode = mode;
    }

    /// True when any bit of `test` is active.
    pub fn matches(self, test: u32) -> bool {
        self.mode & test != 0
    }
}

impl Default for Context {
    fn default() -> Self {
        Context {
            mode: Context::STARTUP,
        }
    }
}
