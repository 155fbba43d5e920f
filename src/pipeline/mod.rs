//! Pipeline building blocks for batch transforms.
//!
//! Each submodule owns exactly one concern and is testable on its own;
//! [`crate::session::BatchPipeline`] wires them together.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ queue ──▶ executor ──▶ naming ──▶ package
//! (files)  (ordered)  (isolate)   (dedupe)   (zip)
//!                        │
//!                 registry / gate / state
//! ```
//!
//! 1. [`input`]: read local files into in-memory payloads
//! 2. [`queue`]: ordered items with stable ids; frozen into a `Batch` per run
//! 3. [`executor`]: one item at a time, progress after each
//! 4. [`isolate`]: a failing or panicking transform fails one item only
//! 5. [`naming`]: sanitise and disambiguate archive entry names
//! 6. [`package`]: append entries, finalize exactly once
//!
//! [`registry`] owns every releasable resource (archive buffers, export temp
//! files, previews), [`gate`] holds the library-readiness signal, and
//! [`state`] is the `idle → processing → done | error` machine.

pub mod executor;
pub mod gate;
pub mod input;
pub mod isolate;
pub mod naming;
pub mod package;
pub mod queue;
pub mod registry;
pub mod state;
