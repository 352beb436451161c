//! Timer subsystem.
//!
//! * [`countdown`] — a single cancellable countdown with tick / expire
//!   callbacks at one-second wall-clock resolution.
//! * [`TimerSet`] — the per-stage collection of scoped countdowns and the
//!   `session > stage > unit` expiry arbitration.

pub mod countdown;
pub mod scope;

pub use countdown::{create, TimerHandle, TimerStatus};
pub use scope::{TimerId, TimerScope, TimerSet, TimerSignal};
