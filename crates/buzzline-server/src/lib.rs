//! Buzzline server: connection hub, buzz arbitration and round handling.

pub mod arbitrator;
pub mod connection;
pub mod handler;
pub mod hub;
pub mod room;
pub mod round;
pub mod server;
pub mod store;
#[cfg(test)]
mod testing;
