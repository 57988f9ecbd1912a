//! Reference-counted heap with scope-bounded temporaries.
//!
//! A [`Handle`] behaves like `Rc`: cloning bumps the reference count and
//! dropping releases it, so a handle held by host code is *retained* and is
//! released exactly once when its owner drops it. Values produced while
//! marshaling or during a call are *mortal*: they are anchored in a
//! [`Scope`], and the anchor is released when the scope closes. Scopes are
//! stack-disciplined (LIFO open/close) and nest arbitrarily; the bridge
//! opens one per call and the event loop opens one per iteration, so
//! transient allocations cannot accumulate across calls or iterations.

use crate::prelude::*;
use crate::value::{CheapClone, ObjBody, ObjKind, Value};

// ============================================================================
// Space - bookkeeping arena behind the heap
// ============================================================================

/// Internal bookkeeping for allocations. Not exposed directly; accessed
/// through [`Heap`]. The registry holds weak references only, so it never
/// keeps an object alive; it exists for liveness accounting.
struct Space {
    next_id: u64,
    total_allocs: u64,
    registry: Vec<Weak<RefCell<ObjBody>>>,
    allocs_since_sweep: usize,
    scope_depth: usize,
}

/// Compact the registry after this many allocations.
const SWEEP_INTERVAL: usize = 256;

impl Space {
    fn new() -> Self {
        Space {
            next_id: 1,
            total_allocs: 0,
            registry: Vec::new(),
            allocs_since_sweep: 0,
            scope_depth: 0,
        }
    }

    fn sweep(&mut self) {
        self.registry.retain(|w| w.strong_count() > 0);
        self.allocs_since_sweep = 0;
    }
}

// ============================================================================
// Handle - reference-counted pointer to a heap object
// ============================================================================

/// Reference to a heap object. Equality and hashing use the object id, so
/// two handles compare equal exactly when they refer to the same object.
pub struct Handle {
    id: u64,
    body: Rc<RefCell<ObjBody>>,
}

impl Handle {
    /// Borrow the object body immutably.
    pub fn borrow(&self) -> Ref<'_, ObjBody> {
        self.body.borrow()
    }

    /// Borrow the object body mutably.
    pub fn borrow_mut(&self) -> RefMut<'_, ObjBody> {
        self.body.borrow_mut()
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn ptr_eq(a: &Handle, b: &Handle) -> bool {
        a.id == b.id
    }

    /// Current reference count, counting scope anchors as holders.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.body)
    }
}

impl Clone for Handle {
    fn clone(&self) -> Self {
        Handle {
            id: self.id,
            body: Rc::clone(&self.body),
        }
    }
}

impl CheapClone for Handle {}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Handle {}

impl std::hash::Hash for Handle {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle").field("id", &self.id).finish()
    }
}

// ============================================================================
// Scope - a nested region anchoring mortal values
// ============================================================================

/// A temporary-value region. Mortal handles anchored here stay alive until
/// the scope is dropped; dropping releases every anchor exactly once, on
/// error paths included, because release rides on `Drop`.
pub struct Scope {
    space: Weak<RefCell<Space>>,
    kept: RefCell<Vec<Handle>>,
}

impl Scope {
    /// Anchor an object in this scope.
    pub fn keep(&self, handle: &Handle) {
        self.kept.borrow_mut().push(handle.cheap_clone());
    }

    /// Anchor the object inside a value, if any. Scalars need no anchor.
    pub fn keep_value(&self, value: &Value) {
        if let Value::Obj(h) = value {
            self.keep(h);
        }
    }

    /// Number of anchors currently held.
    pub fn len(&self) -> usize {
        self.kept.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.kept.borrow().is_empty()
    }

    /// Release all anchors now, without closing the scope.
    pub fn clear(&self) {
        self.kept.borrow_mut().clear();
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        if let Some(space) = self.space.upgrade() {
            let mut space = space.borrow_mut();
            space.scope_depth = space.scope_depth.saturating_sub(1);
        }
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kept", &self.kept.borrow().len())
            .finish()
    }
}

// ============================================================================
// Heap - the public allocation surface
// ============================================================================

/// Allocation statistics, used by tests and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub live: usize,
    pub total_allocated: u64,
    pub scope_depth: usize,
}

/// The object heap. Cloning a `Heap` is cheap and yields another handle to
/// the same arena (the event loop holds one to open per-iteration scopes).
pub struct Heap {
    space: Rc<RefCell<Space>>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            space: Rc::new(RefCell::new(Space::new())),
        }
    }

    /// Allocate a retained object. The returned handle is the sole owner
    /// until cloned or anchored.
    pub fn alloc(&self, kind: ObjKind) -> Handle {
        let mut space = self.space.borrow_mut();
        let id = space.next_id;
        space.next_id += 1;
        space.total_allocs += 1;

        let body = Rc::new(RefCell::new(ObjBody::new(kind)));
        space.registry.push(Rc::downgrade(&body));
        space.allocs_since_sweep += 1;
        if space.allocs_since_sweep >= SWEEP_INTERVAL {
            space.sweep();
        }

        Handle { id, body }
    }

    /// Allocate a mortal object: anchored in `scope`, released when it
    /// closes unless retained elsewhere in the meantime.
    pub fn alloc_in(&self, scope: &Scope, kind: ObjKind) -> Handle {
        let handle = self.alloc(kind);
        scope.keep(&handle);
        handle
    }

    /// Open a temporary-value scope. Scopes close via `Drop` and are
    /// expected to close in LIFO order.
    pub fn open_scope(&self) -> Scope {
        self.space.borrow_mut().scope_depth += 1;
        Scope {
            space: Rc::downgrade(&self.space),
            kept: RefCell::new(Vec::new()),
        }
    }

    /// Number of objects still reachable through some handle or anchor.
    pub fn live(&self) -> usize {
        let mut space = self.space.borrow_mut();
        space.sweep();
        space.registry.len()
    }

    pub fn scope_depth(&self) -> usize {
        self.space.borrow().scope_depth
    }

    pub fn stats(&self) -> HeapStats {
        let mut space = self.space.borrow_mut();
        space.sweep();
        HeapStats {
            live: space.registry.len(),
            total_allocated: space.total_allocs,
            scope_depth: space.scope_depth,
        }
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

impl Clone for Heap {
    fn clone(&self) -> Self {
        Heap {
            space: Rc::clone(&self.space),
        }
    }
}

impl CheapClone for Heap {}
