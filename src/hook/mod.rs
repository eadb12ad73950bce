//! Resource hooks: offline-tolerant access to one backend collection each.
//!
//! A hook loads its collection through the document store, falls back to
//! the local cache (then to a built-in dataset) when the backend can't be
//! reached, and turns writes made while offline into queued mutations that
//! are replayed in order once connectivity returns.

mod panel;
mod record;
mod resource;

pub use panel::{ResourcePanel, Row, SyncMark};
pub use record::RecordKey;
pub use resource::{HookContext, HookSettings, Resolution, ResourceHook};
