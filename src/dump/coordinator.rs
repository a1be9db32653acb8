//! The controller session.
//!
//! Runs the consistency protocol: take the global read lock, open the
//! controller snapshot, bring up the workers (each opening its own snapshot
//! under the lock), release the lock, then walk databases and tables turning
//! them into dump jobs.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Error};
use log::{error, info, warn};
use mysql::prelude::Queryable;
use mysql::Conn;

use super::chunk::plan_table_chunks;
use super::metadata::MetadataWriter;
use super::session;
use super::sql::row_text;
use super::worker::{Job, WorkerPool};
use crate::config::DumpConfig;

/// Run a complete dump. The output directory must exist and `metadata` must
/// already be open; both are the caller's responsibility.
pub fn run_dump(config: &Arc<DumpConfig>, mut metadata: MetadataWriter) -> Result<(), Error> {
    let mut conn = session::connect(config)?;
    session::set_names_binary(&mut conn)?;

    if let Err(err) = conn.query_drop("FLUSH TABLES WITH READ LOCK") {
        warn!(
            "couldn't acquire global lock, snapshots will not be consistent: {}",
            err
        );
    }

    // Pre-4.1.8 servers need a table touched before the snapshot takes
    // effect, so try to keep a throwaway table around for a dummy read.
    let need_dummy_read = conn
        .query_drop("CREATE TABLE IF NOT EXISTS mysql.mydumperdummy (a INT) ENGINE=INNODB")
        .is_ok();

    session::start_consistent_snapshot(&mut conn, need_dummy_read)?;

    metadata.write_start()?;
    metadata.write_replication_status(&mut conn)?;

    // Snapshot barrier: the pool only returns once every worker holds its
    // snapshot, making it safe to let writes through again.
    let pool = WorkerPool::start(config, need_dummy_read)?;
    if let Err(err) = conn.query_drop("UNLOCK TABLES") {
        warn!("couldn't release global lock: {}", err);
    }

    for database in list_databases(&mut conn, config)? {
        dump_database(&mut conn, config, &pool, &database);
    }

    pool.shutdown();
    metadata.finish()?;
    info!("dump finished");
    Ok(())
}

fn list_databases(conn: &mut Conn, config: &DumpConfig) -> Result<Vec<String>, Error> {
    if let Some(database) = &config.database {
        return Ok(vec![database.clone()]);
    }
    let names: Vec<String> = conn
        .query("SHOW DATABASES")
        .context("unable to list databases")?;
    Ok(names
        .into_iter()
        .filter(|name| name != "information_schema")
        .collect())
}

fn list_tables(conn: &mut Conn, database: &str) -> Result<Vec<String>, Error> {
    let mut tables = Vec::new();
    let result = conn.query_iter(format!(
        "SHOW /*!50000 FULL */ TABLES FROM `{}`",
        database
    ))?;
    for row in result {
        let row = row?;
        // Views don't carry data; pre-5.0 servers return a single column
        // and everything is a base table.
        match row_text(&row, 1) {
            Some(kind) if kind != "BASE TABLE" => continue,
            _ => {}
        }
        if let Some(name) = row_text(&row, 0) {
            tables.push(name);
        }
    }
    Ok(tables)
}

fn dump_database(conn: &mut Conn, config: &Arc<DumpConfig>, pool: &WorkerPool, database: &str) {
    let tables = match list_tables(conn, database) {
        Ok(tables) => tables,
        Err(err) => {
            error!("DB: {} - could not list tables: {:#}", database, err);
            return;
        }
    };
    for table in tables {
        dump_table(conn, config, pool, database, &table);
    }
}

/// Turn one table into jobs: one per chunk predicate, or a single unchunked
/// job when planning is disabled, yields nothing, or fails.
fn dump_table(
    conn: &mut Conn,
    config: &Arc<DumpConfig>,
    pool: &WorkerPool,
    database: &str,
    table: &str,
) {
    let chunks = if config.rows_per_chunk > 0 {
        match plan_table_chunks(conn, database, table, config) {
            Ok(chunks) => chunks,
            Err(err) => {
                warn!(
                    "chunk planning for {}.{} failed, dumping in one piece: {:#}",
                    database, table, err
                );
                Vec::new()
            }
        }
    } else {
        Vec::new()
    };

    if chunks.is_empty() {
        pool.enqueue(Job::Dump {
            database: database.to_string(),
            table: table.to_string(),
            where_predicate: None,
            path: table_dump_path(config, database, table),
        });
    } else {
        for (index, predicate) in chunks.into_iter().enumerate() {
            pool.enqueue(Job::Dump {
                database: database.to_string(),
                table: table.to_string(),
                where_predicate: Some(predicate),
                path: chunk_dump_path(config, database, table, index),
            });
        }
    }
}

fn compression_suffix(config: &DumpConfig) -> &'static str {
    if config.compress_output {
        ".gz"
    } else {
        ""
    }
}

fn table_dump_path(config: &DumpConfig, database: &str, table: &str) -> PathBuf {
    config.output_dir.join(format!(
        "{}.{}.sql{}",
        database,
        table,
        compression_suffix(config)
    ))
}

fn chunk_dump_path(config: &DumpConfig, database: &str, table: &str, index: usize) -> PathBuf {
    config.output_dir.join(format!(
        "{}.{}.{:05}.sql{}",
        database,
        table,
        index,
        compression_suffix(config)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(compress: bool) -> DumpConfig {
        DumpConfig {
            host: None,
            port: 3306,
            user: None,
            password: None,
            database: None,
            num_threads: 4,
            output_dir: PathBuf::from("out"),
            statement_size: 1_000_000,
            rows_per_chunk: 0,
            compress_output: compress,
            use_any_index: true,
        }
    }

    #[test]
    fn test_unchunked_file_name() {
        let config = test_config(false);
        assert_eq!(
            table_dump_path(&config, "harry", "t"),
            PathBuf::from("out/harry.t.sql")
        );
    }

    #[test]
    fn test_chunked_file_names_are_zero_padded() {
        let config = test_config(false);
        assert_eq!(
            chunk_dump_path(&config, "db", "big", 0),
            PathBuf::from("out/db.big.00000.sql")
        );
        assert_eq!(
            chunk_dump_path(&config, "db", "big", 9),
            PathBuf::from("out/db.big.00009.sql")
        );
        assert_eq!(
            chunk_dump_path(&config, "db", "big", 123456),
            PathBuf::from("out/db.big.123456.sql")
        );
    }

    #[test]
    fn test_compressed_file_names() {
        let config = test_config(true);
        assert_eq!(
            table_dump_path(&config, "harry", "t"),
            PathBuf::from("out/harry.t.sql.gz")
        );
        assert_eq!(
            chunk_dump_path(&config, "db", "big", 1),
            PathBuf::from("out/db.big.00001.sql.gz")
        );
    }

    #[test]
    fn test_file_names_unique_within_run() {
        let config = test_config(false);
        let mut names: Vec<PathBuf> = (0..20)
            .map(|i| chunk_dump_path(&config, "db", "t", i))
            .collect();
        names.push(table_dump_path(&config, "db", "t2"));
        names.push(table_dump_path(&config, "db2", "t"));
        let total = names.len();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), total);
    }
}
