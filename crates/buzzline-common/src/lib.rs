//! Shared types for the buzzline quiz server and client: the wire protocol,
//! room and question model, the scoring function and the round state machine.

pub mod model;
pub mod protocol;
pub mod scoring;
pub mod session;
