//! RequestContext - per-request, copy-on-extend propagation of typed values.
//!
//! The host pipeline owns one context per logical request and threads it
//! through every hook. Each value lives in a slot keyed by its Rust type, so
//! a module that keeps its slot types private owns keys nobody else can read,
//! overwrite or collide with.
//!
//! ```text
//! ctx0 (host)                         ── sees {}
//!   └─ ctx1 = ctx0.with(A)            ── sees {A}
//!        ├─ ctx2 = ctx1.with(B)       ── sees {A, B}
//!        └─ ctx3 = ctx1.with(B')      ── sees {A, B'}   (independent of ctx2)
//! ```
//!
//! Extending never mutates an existing view. Views are cheap to clone and can
//! be handed to concurrent outbound calls without locking.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

struct Node {
    key: TypeId,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Node>>,
}

/// Immutable view over the slots attached to one request
#[derive(Clone, Default)]
pub struct RequestContext {
    head: Option<Arc<Node>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new view with `value` stored under the slot for `T`.
    ///
    /// An existing value of the same type is shadowed in the new view only.
    pub fn with<T>(&self, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            head: Some(Arc::new(Node {
                key: TypeId::of::<T>(),
                value: Arc::new(value),
                parent: self.head.clone(),
            })),
        }
    }

    /// The most recent value stored under the slot for `T`, if any.
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Any + Send + Sync,
    {
        let key = TypeId::of::<T>();
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            if current.key == key {
                return current.value.downcast_ref::<T>();
            }
            node = current.parent.as_deref();
        }
        None
    }

    pub fn contains<T>(&self) -> bool
    where
        T: Any + Send + Sync,
    {
        self.get::<T>().is_some()
    }

    /// Number of stored values, shadowed ones included.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut node = self.head.as_deref();
        while let Some(current) = node {
            depth += 1;
            node = current.parent.as_deref();
        }
        depth
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// True when both views are the same view (not merely equal contents).
    pub fn same_view(&self, other: &RequestContext) -> bool {
        match (&self.head, &other.head) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("depth", &self.depth())
            .finish()
    }
}
