use std::path::PathBuf;

use chrono::Local;
use mysql::{Opts, OptsBuilder};

pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_NUM_THREADS: usize = 4;
pub const DEFAULT_STATEMENT_SIZE: usize = 1_000_000;

/// Immutable dump configuration, built once at startup and passed by
/// reference into the coordinator, planner, encoder and workers.
#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Dump only this database; `None` dumps everything except
    /// `information_schema`.
    pub database: Option<String>,
    pub num_threads: usize,
    pub output_dir: PathBuf,
    /// Attempted size of a single INSERT statement, in bytes. Exceeded by
    /// at most one row since the check happens after appending.
    pub statement_size: usize,
    /// Target rows per chunk; 0 disables chunking entirely.
    pub rows_per_chunk: u64,
    pub compress_output: bool,
    /// Allow a non-unique index as the chunking key when no primary or
    /// unique index exists.
    pub use_any_index: bool,
}

impl DumpConfig {
    pub fn connection_opts(&self) -> Opts {
        OptsBuilder::new()
            .ip_or_hostname(self.host.as_deref())
            .tcp_port(self.port)
            .user(self.user.as_deref())
            .pass(self.password.as_deref())
            .db_name(self.database.as_deref())
            .into()
    }
}

/// `export-YYYYMMDD-HHMMSS`, stamped at startup.
pub fn default_output_dir() -> PathBuf {
    PathBuf::from(format!("export-{}", Local::now().format("%Y%m%d-%H%M%S")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_dir_shape() {
        let dir = default_output_dir();
        let name = dir.file_name().unwrap().to_str().unwrap();
        // export- plus YYYYMMDD-HHMMSS
        assert!(name.starts_with("export-"));
        assert_eq!(name.len(), "export-".len() + 15);
        assert_eq!(name.as_bytes()["export-".len() + 8], b'-');
    }
}
