//! Intake discovery (spec §4.1): an event watcher plus a periodic
//! reconciler, both enqueuing into the same idempotent catalog table.

pub mod folder;
pub mod reconciler;

pub use folder::EventWatcher;
pub use reconciler::Reconciler;
