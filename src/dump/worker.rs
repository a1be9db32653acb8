use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Error};
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error};
use mysql::Conn;

use super::session;
use super::sink::DataSink;
use super::sql::dump_table_data;
use crate::config::DumpConfig;

/// Unit of work on the queue: one table (or one chunk of one table), or the
/// order to wind down. Any worker may pick up any job.
pub enum Job {
    Dump {
        database: String,
        table: String,
        where_predicate: Option<String>,
        path: PathBuf,
    },
    Shutdown,
}

/// Fixed-size pool of dump workers sharing one job queue. Each worker owns
/// its connection and its consistent snapshot for its whole lifetime.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    jobs: Sender<Job>,
}

impl WorkerPool {
    /// Spawn the workers and wait for the snapshot barrier: this returns
    /// only once every worker holds its consistent snapshot, so the caller
    /// may release the global read lock afterwards. A worker that fails to
    /// connect or to open its snapshot fails the whole dump.
    pub fn start(config: &Arc<DumpConfig>, need_dummy_read: bool) -> Result<Self, Error> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = crossbeam_channel::unbounded();

        let mut workers = Vec::with_capacity(config.num_threads);
        for id in 0..config.num_threads {
            let config = Arc::clone(config);
            let jobs = job_rx.clone();
            let ready = ready_tx.clone();
            let handle = thread::Builder::new()
                .name(format!("dump-worker-{}", id))
                .spawn(move || worker_loop(id, &config, need_dummy_read, jobs, ready))?;
            workers.push(handle);
        }
        drop(ready_tx);

        for _ in 0..config.num_threads {
            ready_rx
                .recv()
                .context("worker exited before signalling readiness")??;
        }

        Ok(Self {
            workers,
            jobs: job_tx,
        })
    }

    pub fn enqueue(&self, job: Job) {
        if self.jobs.send(job).is_err() {
            // only reachable when every worker is already gone
            error!("job queue closed, dropping job");
        }
    }

    /// Push one shutdown sentinel per worker and wait for all of them.
    /// Since any worker may consume any sentinel, each worker exits exactly
    /// once.
    pub fn shutdown(self) {
        for _ in 0..self.workers.len() {
            self.enqueue(Job::Shutdown);
        }
        for handle in self.workers {
            if handle.join().is_err() {
                error!("dump worker panicked");
            }
        }
    }
}

fn worker_loop(
    id: usize,
    config: &DumpConfig,
    need_dummy_read: bool,
    jobs: Receiver<Job>,
    ready: Sender<Result<(), Error>>,
) {
    let mut conn = match open_worker_session(config, need_dummy_read) {
        Ok(conn) => {
            let _ = ready.send(Ok(()));
            conn
        }
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    // Dropping the sender here means a worker that dies without signalling
    // turns the controller's barrier wait into an error instead of a hang.
    drop(ready);

    loop {
        match jobs.recv() {
            Ok(Job::Dump {
                database,
                table,
                where_predicate,
                path,
            }) => {
                debug!("worker {}: dumping {}.{}", id, database, table);
                if let Err(err) = run_dump_job(
                    &mut conn,
                    config,
                    &database,
                    &table,
                    where_predicate.as_deref(),
                    &path,
                ) {
                    error!(
                        "worker {}: dump of {}.{} failed: {:#}",
                        id, database, table, err
                    );
                }
            }
            // A closed queue means the controller is gone; treat it like a
            // shutdown so the connection still closes cleanly.
            Ok(Job::Shutdown) | Err(_) => break,
        }
    }
}

fn open_worker_session(config: &DumpConfig, need_dummy_read: bool) -> Result<Conn, Error> {
    let mut conn = session::connect(config)?;
    session::set_names_binary(&mut conn)?;
    session::start_consistent_snapshot(&mut conn, need_dummy_read)?;
    Ok(conn)
}

fn run_dump_job(
    conn: &mut Conn,
    config: &DumpConfig,
    database: &str,
    table: &str,
    where_predicate: Option<&str>,
    path: &Path,
) -> Result<(), Error> {
    let mut sink = DataSink::create(path, config.compress_output)
        .with_context(|| format!("could not create output file {}", path.display()))?;
    dump_table_data(conn, &mut sink, database, table, where_predicate, config)?;
    sink.finish()
        .with_context(|| format!("could not finish output file {}", path.display()))?;
    Ok(())
}
