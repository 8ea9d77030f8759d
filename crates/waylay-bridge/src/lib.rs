//! # waylay-bridge
//!
//! Carries capture and dispatch events between buses in different processes.
//!
//! - [`codec`]: the JSON frame format, one event per WebSocket text frame.
//! - [`BusBridge`](bridge::BusBridge): glue between one local bus and one
//!   peer. Local events go out, peer frames are published locally.
//! - [`server`]: axum endpoint (`/ws`, `/health`) giving every connecting
//!   peer its own bridge onto the hub's bus.
//! - [`client`]: connects a local bus to a hub.

#![deny(unsafe_code)]

pub mod bridge;
pub mod client;
pub mod codec;
pub mod errors;
pub mod health;
pub mod server;
mod session;
