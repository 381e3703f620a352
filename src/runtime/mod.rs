//! # Runtime
//!
//! Process bootstrap, the controller watch loop and its error policy.

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

pub use error_policy::{handle_reconciliation_error, handle_watch_stream_error, WatchErrorKind};
pub use initialization::{initialize, InitializationResult};
pub use watch_loop::run_watch_loop;
