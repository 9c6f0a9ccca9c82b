//! taskgrid-autoscale: grows and shrinks the worker pool.
//!
//! The [`Autoscaler`] is pure decision logic: the dispatcher feeds it the
//! current backlog, pool size, and a [`ResourceProbe`] reading once per tick
//! and applies the returned [`ScaleDecision`] to the pool.

pub mod probe;
pub mod scaler;

pub use probe::{ResourceProbe, StaticProbe, SystemProbe};
pub use scaler::{Autoscaler, ScaleDecision, ScaleInputs};
