//! Longeron Core
//!
//! This crate contains the runtime-agnostic client-engine building blocks:
//! - Bounded queues with explicit overflow policies (`queue`)
//! - Command object pooling (`pool`)
//! - Single-assignment completion cells (`completion`)
//! - Explicit command deadlines (`deadline`)
//! - Reconnect backoff policy (`backoff`)
//! - Hierarchical subject matching (`subject`)
//! - Connection options and statistics (`options`, `counters`)
//! - Error types (`error`)

#![cfg_attr(not(test), deny(unsafe_code))]
// Allow some pedantic lints that are intentional in this crate
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::match_same_arms)]

pub mod backoff;
pub mod completion;
pub mod counters;
pub mod deadline;
pub mod error;
pub mod options;
pub mod pool;
pub mod queue;
pub mod subject;

// Optional: a small prelude to make downstream crates ergonomic.
// Keep it minimal to avoid API lock-in.
pub mod prelude {
    pub use crate::backoff::{ReconnectPolicy, ReconnectState};
    pub use crate::completion::{Completion, Outcome};
    pub use crate::counters::ConnectionCounters;
    pub use crate::deadline::Deadline;
    pub use crate::error::{LongeronError, Result};
    pub use crate::options::ConnectOptions;
    pub use crate::pool::{Pool, Recycle};
    pub use crate::queue::{bounded, OverflowPolicy, PolicyQueue};
    pub use crate::subject::{valid_subject, SubjectPattern};
}
