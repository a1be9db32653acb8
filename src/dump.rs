//! This module implements the parallel dump pipeline.
//!
//! # Consistency protocol
//!
//! A logical backup taken by many sessions is only worth anything if every
//! session sees the same point in time. The controller takes
//! `FLUSH TABLES WITH READ LOCK`, opens its own
//! `START TRANSACTION WITH CONSISTENT SNAPSHOT`, and then brings up the
//! worker pool. Each worker opens its own snapshot and signals readiness;
//! only after all of them have done so does the controller issue
//! `UNLOCK TABLES`. From then on the server is writable again, but every
//! dump session keeps reading the pre-unlock state.
//!
//! # Data flow
//!
//! controller -> chunk planner -> job queue -> worker -> INSERT encoder
//! -> output sink -> filesystem.
//!
//! Large tables are split by the planner into disjoint integer ranges over
//! an indexed column so several workers can drain one table concurrently.
//! Each job writes one SQL file; with compression enabled the file is
//! gzip-framed and suffixed `.gz`. Replication coordinates and the dump
//! start/finish times go into a `.metadata` sidecar.

mod chunk;
pub use chunk::*;

mod coordinator;
pub use coordinator::*;

mod metadata;
pub use metadata::*;

mod session;
pub use session::*;

mod sink;
pub use sink::*;

mod sql;
pub use sql::*;

mod worker;
pub use worker::*;
