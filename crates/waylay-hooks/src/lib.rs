//! # waylay-hooks
//!
//! Automated and manual resolution of captured invocations.
//!
//! - [`HookRouter`](router::HookRouter) listens for captures on a bus and
//!   applies the first matching [`HookRule`](rule::HookRule): pass the event
//!   straight through (optionally after a delay) or park it in the
//!   [`SuspensionQueue`](queue::SuspensionQueue).
//! - Parked events are resolved with [`HookRouter::submit`](router::HookRouter::submit),
//!   which validates the edited value against the capture's suggestions and
//!   can register a rule for future captures from the same interceptor.

#![deny(unsafe_code)]

pub mod errors;
pub mod queue;
pub mod router;
pub mod rule;
