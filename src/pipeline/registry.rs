//! Resource handle registry: the single owner of release responsibility.
//!
//! Every transient allocation that must be explicitly reclaimed (the
//! finalized archive buffer, spilled download files, UI previews, scratch
//! data a transform wants cleaned up) is registered here the moment it is
//! created. Components never release such resources themselves; `reset`
//! calls [`ResourceRegistry::release_all`], and dropping the registry
//! releases whatever is still live.
//!
//! Releasing is idempotent: a token that was already released is a no-op.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// What kind of resource a handle refers to. Used for logging and stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// The finalized archive buffer.
    Archive,
    /// A file spilled to disk for download.
    Download,
    /// A UI preview (thumbnail, decoded bitmap).
    Preview,
    /// Scratch data registered by a transform.
    Scratch,
}

/// Token returned by [`ResourceRegistry::register`]; used to release later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleToken(u64);

impl fmt::Display for HandleToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handle-{}", self.0)
    }
}

type Release = Box<dyn FnOnce() + Send>;

struct Entry {
    kind: ResourceKind,
    release: Release,
}

#[derive(Default)]
struct Slots {
    next: u64,
    live: BTreeMap<HandleToken, Entry>,
    released: usize,
}

/// Tracks releasable resources for one pipeline.
#[derive(Default)]
pub struct ResourceRegistry {
    slots: Mutex<Slots>,
}

impl fmt::Debug for ResourceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.lock();
        f.debug_struct("ResourceRegistry")
            .field("live", &slots.live.len())
            .field("released", &slots.released)
            .finish()
    }
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `resource`; releasing the token drops it.
    pub fn register<T: Send + 'static>(&self, kind: ResourceKind, resource: T) -> HandleToken {
        self.register_with(kind, move || drop(resource))
    }

    /// Register an explicit release action.
    pub fn register_with(
        &self,
        kind: ResourceKind,
        release: impl FnOnce() + Send + 'static,
    ) -> HandleToken {
        let mut slots = self.lock();
        slots.next += 1;
        let token = HandleToken(slots.next);
        slots.live.insert(
            token,
            Entry {
                kind,
                release: Box::new(release),
            },
        );
        debug!("Registered {:?} resource as {}", kind, token);
        token
    }

    /// Release exactly this resource. Returns whether anything was released.
    pub fn release(&self, token: HandleToken) -> bool {
        // Run the release action outside the lock: it may drop large buffers
        // or touch the file system.
        let entry = {
            let mut slots = self.lock();
            let entry = slots.live.remove(&token);
            if entry.is_some() {
                slots.released += 1;
            }
            entry
        };
        match entry {
            Some(entry) => {
                debug!("Releasing {:?} resource {}", entry.kind, token);
                (entry.release)();
                true
            }
            None => false,
        }
    }

    /// Release every live resource in registration order.
    ///
    /// Returns how many resources were released.
    pub fn release_all(&self) -> usize {
        let drained = {
            let mut slots = self.lock();
            let drained = std::mem::take(&mut slots.live);
            slots.released += drained.len();
            drained
        };
        let n = drained.len();
        for (_, entry) in drained {
            (entry.release)();
        }
        if n > 0 {
            debug!("Released {} resources", n);
        }
        n
    }

    pub fn is_live(&self, token: HandleToken) -> bool {
        self.lock().live.contains_key(&token)
    }

    pub fn live_count(&self) -> usize {
        self.lock().live.len()
    }

    /// Live handles of one kind.
    pub fn live_of(&self, kind: ResourceKind) -> usize {
        self.lock().live.values().filter(|e| e.kind == kind).count()
    }

    /// Total releases performed over the registry's lifetime.
    pub fn released_count(&self) -> usize {
        self.lock().released
    }

    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panicking release action cannot leave `Slots` half-updated: the
        // entry is removed before the action runs.
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for ResourceRegistry {
    fn drop(&mut self) {
        self.release_all();
    }
}
