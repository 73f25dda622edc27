//! Run-level cooperative cancellation.
//!
//! A run shares one [`CancellationToken`] between the engine's dispatch loop
//! and every observer stage polling for events.

mod token;

pub use token::{CancelCallback, CancellationToken};
