//! # waylay-bus
//!
//! The in-process half of the interception protocol.
//!
//! - [`EventBus`](bus::EventBus) fans `capture` and `dispatch` events out to
//!   direction-filtered subscribers and refuses to re-emit events it has
//!   already relayed, which is what keeps bridged buses from echoing forever.
//! - [`intercept`](interceptor::intercept) wraps an async function so each
//!   call can be suspended at its arguments and/or its return value until a
//!   matching dispatch arrives or a timeout elapses.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use waylay_bus::bus::EventBus;
//! use waylay_bus::interceptor::{intercept, InterceptOptions};
//! use waylay_core::protocol::Trigger;
//!
//! # async fn demo() -> Result<(), waylay_bus::errors::InterceptError> {
//! let bus = EventBus::new();
//! let square = intercept(
//!     &bus,
//!     |(x,): (i64,)| async move { x * x },
//!     InterceptOptions::new(Trigger::Both).with_timeout(Duration::from_secs(5)),
//! );
//! let value = square.call((3,)).await?;
//! # let _ = value;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod bus;
pub mod errors;
pub mod interceptor;
