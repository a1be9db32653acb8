use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Error};
use chrono::Local;
use log::warn;
use mysql::prelude::Queryable;
use mysql::{Conn, Row};

use super::sql::{row_text, row_text_by_name};

pub const METADATA_FILE_NAME: &str = ".metadata";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sidecar file recording replication coordinates and the dump start/finish
/// times. Written exclusively by the controller thread; the presence of the
/// finish line is the canonical signal that the dump ran to completion.
pub struct MetadataWriter {
    file: File,
}

impl MetadataWriter {
    pub fn create(output_dir: &Path) -> Result<Self, Error> {
        let path = output_dir.join(METADATA_FILE_NAME);
        let file = File::create(&path)
            .with_context(|| format!("couldn't write metadata file {}", path.display()))?;
        Ok(Self { file })
    }

    pub fn write_start(&mut self) -> Result<(), Error> {
        writeln!(
            self.file,
            "Started dump at: {}",
            Local::now().format(TIMESTAMP_FORMAT)
        )?;
        Ok(())
    }

    /// Capture the replication coordinates before the snapshot view can
    /// drift from them. Servers that aren't masters or replicas simply
    /// return empty result sets and the sections are omitted.
    pub fn write_replication_status(&mut self, conn: &mut Conn) -> Result<(), Error> {
        match conn.query_first::<Row, _>("SHOW MASTER STATUS") {
            Ok(Some(row)) => {
                if let (Some(log), Some(pos)) = (row_text(&row, 0), row_text(&row, 1)) {
                    self.file
                        .write_all(format_master_status(&log, &pos).as_bytes())?;
                }
            }
            Ok(None) => {}
            Err(err) => warn!("couldn't read master status: {}", err),
        }

        match conn.query_first::<Row, _>("SHOW SLAVE STATUS") {
            Ok(Some(row)) => {
                if let Some(host) = row_text_by_name(&row, "master_host") {
                    let log = row_text_by_name(&row, "relay_master_log_file").unwrap_or_default();
                    let pos = row_text_by_name(&row, "exec_master_log_pos").unwrap_or_default();
                    self.file
                        .write_all(format_slave_status(&host, &log, &pos).as_bytes())?;
                }
            }
            Ok(None) => {}
            Err(err) => warn!("couldn't read slave status: {}", err),
        }

        self.file.flush()?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(), Error> {
        writeln!(
            self.file,
            "Finished dump at: {}",
            Local::now().format(TIMESTAMP_FORMAT)
        )?;
        self.file.flush()?;
        Ok(())
    }
}

fn format_master_status(log: &str, pos: &str) -> String {
    format!("SHOW MASTER STATUS:\n\tLog: {}\n\tPos: {}\n\n", log, pos)
}

fn format_slave_status(host: &str, log: &str, pos: &str) -> String {
    format!(
        "SHOW SLAVE STATUS:\n\tHost: {}\n\tLog: {}\n\tPos: {}\n\n",
        host, log, pos
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_master_status_format() {
        assert_eq!(
            format_master_status("mysql-bin.000002", "12345"),
            "SHOW MASTER STATUS:\n\tLog: mysql-bin.000002\n\tPos: 12345\n\n"
        );
    }

    #[test]
    fn test_slave_status_format() {
        assert_eq!(
            format_slave_status("10.0.0.1", "mysql-bin.000007", "99"),
            "SHOW SLAVE STATUS:\n\tHost: 10.0.0.1\n\tLog: mysql-bin.000007\n\tPos: 99\n\n"
        );
    }

    #[test]
    fn test_start_and_finish_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut metadata = MetadataWriter::create(dir.path()).unwrap();
        metadata.write_start().unwrap();
        metadata.finish().unwrap();

        let contents = std::fs::read_to_string(dir.path().join(METADATA_FILE_NAME)).unwrap();
        let mut lines = contents.lines();
        let started = lines.next().unwrap();
        let finished = lines.next().unwrap();
        assert!(started.starts_with("Started dump at: "));
        assert!(finished.starts_with("Finished dump at: "));
        // YYYY-MM-DD HH:MM:SS
        assert_eq!(started.len(), "Started dump at: ".len() + 19);
        assert!(lines.next().is_none());
    }
}
