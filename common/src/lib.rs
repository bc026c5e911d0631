//! Shared types for the unblink worker: configuration, the relay wire
//! protocol and temporal-context math.

pub mod config;
pub mod protocol;
pub mod temporal;
