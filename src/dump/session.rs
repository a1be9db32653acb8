//! Per-thread database session setup.
//!
//! Every thread owns its connection for the whole dump; a session is never
//! shared. Consistency across sessions comes from starting every snapshot
//! while the controller still holds the global read lock.

use anyhow::{Context, Error};
use mysql::prelude::Queryable;
use mysql::Conn;

use crate::config::DumpConfig;

pub const SET_NAMES_BINARY: &str = "/*!40101 SET NAMES binary*/";
pub const START_CONSISTENT_SNAPSHOT: &str =
    "START TRANSACTION /*!40108 WITH CONSISTENT SNAPSHOT */";
const DUMMY_READ: &str = "SELECT * FROM mysql.mydumperdummy";

pub fn connect(config: &DumpConfig) -> Result<Conn, Error> {
    Conn::new(config.connection_opts()).with_context(|| {
        format!(
            "failed to connect to database at {}:{}",
            config.host.as_deref().unwrap_or("localhost"),
            config.port
        )
    })
}

pub fn set_names_binary(conn: &mut Conn) -> Result<(), Error> {
    conn.query_drop(SET_NAMES_BINARY)?;
    Ok(())
}

/// Open this session's consistent snapshot. Servers from before 4.1.8 only
/// honour `WITH CONSISTENT SNAPSHOT` once a table has been touched, hence
/// the optional dummy read; its result is deliberately ignored.
pub fn start_consistent_snapshot(conn: &mut Conn, need_dummy_read: bool) -> Result<(), Error> {
    conn.query_drop(START_CONSISTENT_SNAPSHOT)
        .context("failed to start consistent snapshot")?;
    if need_dummy_read {
        let _ = conn.query_drop(DUMMY_READ);
    }
    Ok(())
}
