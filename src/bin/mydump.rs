use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{bail, Error};
use clap::Parser;
use log::error;

use mydump::config::{
    default_output_dir, DumpConfig, DEFAULT_NUM_THREADS, DEFAULT_PORT, DEFAULT_STATEMENT_SIZE,
};
use mydump::dump::{run_dump, MetadataWriter};
use mydump::tools::create_output_dir;

#[derive(Parser)]
#[command(name = "mydump", about = "multi-threaded MySQL dumping", disable_help_flag = true)]
struct Cli {
    /// The host to connect to
    #[arg(short = 'h', long)]
    host: Option<String>,

    /// Username with privileges to run the dump
    #[arg(short = 'u', long)]
    user: Option<String>,

    /// User password
    #[arg(short = 'p', long)]
    password: Option<String>,

    /// TCP/IP port to connect to
    #[arg(short = 'P', long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Database to dump
    #[arg(short = 'B', long)]
    database: Option<String>,

    /// Number of parallel threads
    #[arg(short = 't', long, default_value_t = DEFAULT_NUM_THREADS)]
    threads: usize,

    /// Directory to output files to, default ./export-*/
    #[arg(short = 'o', long)]
    outputdir: Option<PathBuf>,

    /// Attempted size of INSERT statement in bytes
    #[arg(short = 's', long = "statement-size", default_value_t = DEFAULT_STATEMENT_SIZE)]
    statement_size: usize,

    /// Try to split tables into chunks of this many rows
    #[arg(short = 'r', long, default_value_t = 0)]
    rows: u64,

    /// Compress output files
    #[arg(short = 'c', long)]
    compress: bool,

    // -h is taken by --host, so the automatic flag is disabled and --help
    // re-added by hand.
    #[arg(long, action = clap::ArgAction::Help, help = "Print help")]
    help: Option<bool>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{:#}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Error> {
    if cli.threads == 0 {
        bail!("at least one thread is required");
    }

    let config = Arc::new(DumpConfig {
        host: cli.host,
        port: cli.port,
        user: cli.user,
        password: cli.password,
        database: cli.database,
        num_threads: cli.threads,
        output_dir: cli.outputdir.unwrap_or_else(default_output_dir),
        statement_size: cli.statement_size,
        rows_per_chunk: cli.rows,
        compress_output: cli.compress,
        use_any_index: true,
    });

    create_output_dir(&config.output_dir)?;
    let metadata = MetadataWriter::create(&config.output_dir)?;

    run_dump(&config, metadata)
}
