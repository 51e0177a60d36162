//! Background Tasks Module
//!
//! Contains background tasks that run periodically during server operation.
//!
//! # Tasks
//! - Memory-pressure cleanup: sheds cache keys when the store fills up

mod cleanup;

pub use cleanup::{select_evictions, CleanupReport, CleanupScheduler, KeyProbe, TypeCleanup};
