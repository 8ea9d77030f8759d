//! # waylay-core
//!
//! Foundation types shared by every waylay crate: branded identifiers, the
//! capture/dispatch wire protocol, hook rule configuration, and logging.

#![deny(unsafe_code)]

pub mod hooks;
pub mod ids;
pub mod logging;
pub mod protocol;
