//! A single node of a proof-of-work cryptocurrency.
//!
//! The [`blockchain`] module holds the consensus core. [`node`] runs it on a
//! dedicated thread next to the HTTP [`api`].

pub mod api;
pub mod blockchain;
pub mod config;
pub mod events;
pub mod node;
