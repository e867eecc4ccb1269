//! The queue worker driving jobs out of `processing_queue` (spec §4.2).

pub mod worker;

pub use worker::QueueWorker;
