//! # hivepoll
//!
//! Long-poll message hub for device notifications and commands.
//!
//! Clients poll for rows newer than a timestamp cursor and, when there are
//! none, block until a matching row is written or their wait runs out.
//! Writers commit and then wake exactly the pollers whose device and name
//! filters match, through an [`waiter::ObjectWaiter`] registry. The hub is
//! served over RESP2, so any Redis client can drive it.

pub mod clock;
pub mod command;
pub mod config;
pub mod connection;
pub mod deadline;
pub mod error;
pub mod handlers;
pub mod hub;
pub mod model;
pub mod poll;
pub mod resp;
pub mod server;
pub mod store;
pub mod waiter;
