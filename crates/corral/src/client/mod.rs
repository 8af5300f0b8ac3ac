pub mod output;

use crate::server::Scheduler;
use crate::transfer::messages::UpdateOptions;
use crate::Result;
use clap::{Parser, Subcommand};
use drover::respool::ResourcePoolConfig;
use drover::JobId;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "corral", about = "Cluster workload orchestrator", version)]
pub struct Opts {
    /// Enable debug logging.
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Path to the server configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the orchestrator server.
    Server,

    /// Resource pool operations.
    #[command(subcommand)]
    Respool(RespoolCommand),

    /// Rolling update operations.
    #[command(subcommand)]
    Update(UpdateCommand),

    /// Host operations.
    #[command(subcommand)]
    Host(HostCommand),
}

#[derive(Subcommand)]
pub enum RespoolCommand {
    /// Create a pool from a TOML spec file.
    Create { spec: PathBuf },
    /// Show a pool by id.
    Get {
        id: String,
        /// Include the direct children.
        #[arg(long)]
        children: bool,
    },
    /// Delete an empty leaf pool.
    Delete { id: String },
    /// Replace a pool's configuration.
    Update {
        id: String,
        spec: PathBuf,
        /// Skip the reservation shrink guard.
        #[arg(long)]
        force: bool,
    },
    /// Find a pool by its /a/b path.
    Lookup { path: String },
    /// List every pool in the tree.
    Query,
}

#[derive(Subcommand)]
pub enum UpdateCommand {
    /// Start an update of a job to a new configuration version.
    Create {
        job_id: u32,
        config_version: u64,
        #[arg(long, default_value_t = 1)]
        batch_size: u32,
        #[arg(long)]
        start_paused: bool,
        #[arg(long)]
        rollback_on_failure: bool,
        #[arg(long, default_value_t = 3)]
        max_instance_attempts: u32,
        #[arg(long, default_value_t = 0)]
        max_failure_instances: u32,
    },
    /// Show an update.
    Get {
        id: String,
        #[arg(long)]
        status_only: bool,
    },
    /// List the updates of a job, newest first.
    List { job_id: u32 },
    Pause { id: String },
    Resume { id: String },
    Rollback { id: String },
    Abort {
        id: String,
        /// Also drop the in-flight instances.
        #[arg(long)]
        hard: bool,
    },
    /// Show the cached update record.
    GetCache { id: String },
}

#[derive(Subcommand)]
pub enum HostCommand {
    /// List hosts, optionally filtered by a name fragment.
    Query {
        #[arg(long)]
        filter: Option<String>,
    },
    /// Hold a host for maintenance.
    MaintenanceEnqueue { hostname: String },
    /// Release a host from maintenance.
    MaintenanceComplete { hostname: String },
}

pub fn run_command(scheduler: &Arc<Scheduler>, command: Command) -> Result<()> {
    match command {
        Command::Server => unreachable!("the server command is handled by the binary"),
        Command::Respool(command) => run_respool(scheduler, command),
        Command::Update(command) => run_update(scheduler, command),
        Command::Host(command) => run_host(scheduler, command),
    }
}

fn load_pool_spec(path: &PathBuf) -> Result<ResourcePoolConfig> {
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

fn run_respool(scheduler: &Arc<Scheduler>, command: RespoolCommand) -> Result<()> {
    let service = scheduler.respool_service();
    match command {
        RespoolCommand::Create { spec } => {
            let id = service.create(load_pool_spec(&spec)?)?;
            println!("{id}");
        }
        RespoolCommand::Get { id, children } => {
            output::print_pool(&service.get(&id, children)?);
        }
        RespoolCommand::Delete { id } => {
            service.delete(&id)?;
        }
        RespoolCommand::Update { id, spec, force } => {
            service.update(&id, load_pool_spec(&spec)?, force)?;
        }
        RespoolCommand::Lookup { path } => {
            println!("{}", service.lookup_by_path(&path)?.id);
        }
        RespoolCommand::Query => {
            output::print_pool_list(&service.query());
        }
    }
    Ok(())
}

fn run_update(scheduler: &Arc<Scheduler>, command: UpdateCommand) -> Result<()> {
    let service = scheduler.update_service();
    match command {
        UpdateCommand::Create {
            job_id,
            config_version,
            batch_size,
            start_paused,
            rollback_on_failure,
            max_instance_attempts,
            max_failure_instances,
        } => {
            let options = UpdateOptions {
                batch_size,
                start_paused,
                rollback_on_failure,
                max_instance_attempts,
                max_failure_instances,
            };
            let id = service.create(JobId::new(job_id), config_version, options)?;
            println!("{id}");
        }
        UpdateCommand::Get { id, status_only } => {
            output::print_update(&service.get(&id, status_only)?);
        }
        UpdateCommand::List { job_id } => {
            output::print_update_list(&service.list(JobId::new(job_id)));
        }
        UpdateCommand::Pause { id } => service.pause(&id)?,
        UpdateCommand::Resume { id } => service.resume(&id)?,
        UpdateCommand::Rollback { id } => service.rollback(&id)?,
        UpdateCommand::Abort { id, hard } => service.abort(&id, hard)?,
        UpdateCommand::GetCache { id } => {
            output::print_update(&service.get_cache(&id)?);
        }
    }
    Ok(())
}

fn run_host(scheduler: &Arc<Scheduler>, command: HostCommand) -> Result<()> {
    let service = scheduler.host_service();
    match command {
        HostCommand::Query { filter } => {
            output::print_host_list(&service.query(filter.as_deref()));
        }
        HostCommand::MaintenanceEnqueue { hostname } => {
            service.maintenance_enqueue(&hostname)?;
        }
        HostCommand::MaintenanceComplete { hostname } => {
            service.maintenance_complete(&hostname)?;
        }
    }
    Ok(())
}
