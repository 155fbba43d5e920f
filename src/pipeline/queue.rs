//! Batch queue: the ordered, identity-stable list of pending items.
//!
//! Identities come from a counter owned by the queue, not from content, so
//! two byte-identical files dropped twice are still two distinct items.
//! The counter survives `clear()`, which keeps identities unique across
//! repeated runs on the same pipeline.

use crate::config::TransformParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Stable opaque identity of one queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(u64);

impl ItemId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One user-supplied input: raw bytes, declared media type and original name.
///
/// The bytes are reference-counted so snapshots and transforms can hold the
/// payload without copying it.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub name: String,
    pub media_type: String,
    pub data: Arc<[u8]>,
}

impl RawInput {
    pub fn new(
        name: impl Into<String>,
        media_type: impl Into<String>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            data: data.into(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One unit of batch work. Immutable once enqueued.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: ItemId,
    pub payload: RawInput,
    /// Zero-based position in the queue.
    pub order: usize,
}

impl Item {
    pub fn name(&self) -> &str {
        &self.payload.name
    }
}

/// Ordered collection of pending items.
///
/// Iteration order is always enqueue order; removing an item shifts the
/// positions of everything behind it.
#[derive(Debug, Default)]
pub struct BatchQueue {
    items: Vec<Item>,
    next_id: u64,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append inputs in the given order and return their new identities.
    pub fn enqueue(&mut self, payloads: impl IntoIterator<Item = RawInput>) -> Vec<ItemId> {
        let mut ids = Vec::new();
        for payload in payloads {
            self.next_id += 1;
            let id = ItemId(self.next_id);
            let order = self.items.len();
            debug!("Enqueued {} '{}' at position {}", id, payload.name, order);
            self.items.push(Item { id, payload, order });
            ids.push(id);
        }
        ids
    }

    /// Remove one item. Returns `false` (and does nothing) if it is absent.
    pub fn remove(&mut self, id: ItemId) -> bool {
        let Some(pos) = self.items.iter().position(|item| item.id == id) else {
            return false;
        };
        self.items.remove(pos);
        for (order, item) in self.items.iter_mut().enumerate().skip(pos) {
            item.order = order;
        }
        true
    }

    /// Remove every item, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let n = self.items.len();
        self.items.clear();
        n
    }

    /// Read-only copy of the queue in order.
    pub fn snapshot(&self) -> Vec<Item> {
        self.items.clone()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The frozen input of one run: ordered items plus run parameters.
#[derive(Debug, Clone)]
pub struct Batch {
    pub items: Vec<Item>,
    pub params: TransformParams,
}

impl Batch {
    pub fn new(items: Vec<Item>, params: TransformParams) -> Self {
        Self { items, params }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
