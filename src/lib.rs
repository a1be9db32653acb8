//! Multi-threaded consistent logical backup for MySQL-compatible servers.
//!
//! The crate dumps every table as a sequence of `INSERT` statements, one
//! SQL file per table or per table chunk, while all participating sessions
//! share a single point-in-time snapshot. See [`dump`] for the protocol.

pub mod config;
pub mod dump;
pub mod tools;
