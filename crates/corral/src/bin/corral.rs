use clap::Parser;
use corral::client::{self, Command, Opts};
use corral::common::setup::setup_logging;
use corral::config::ServerConfig;
use corral::server::Scheduler;
use corral::storage::InMemoryStore;
use std::sync::Arc;

fn main() {
    let opts = match Opts::try_parse() {
        Ok(opts) => opts,
        Err(e) => {
            // Version/help requests are not usage errors.
            if e.use_stderr() {
                eprint!("{e}");
                std::process::exit(1);
            }
            print!("{e}");
            std::process::exit(0);
        }
    };
    setup_logging(opts.verbose);

    let exit_code = match run(opts) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{e}");
            e.exit_code()
        }
    };
    std::process::exit(exit_code);
}

fn run(opts: Opts) -> corral::Result<()> {
    let config = match &opts.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    let store = Arc::new(InMemoryStore::new());
    let scheduler = Arc::new(Scheduler::new(store, config)?);

    match opts.command {
        Command::Server => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(scheduler.serve())
        }
        command => client::run_command(&scheduler, command),
    }
}
