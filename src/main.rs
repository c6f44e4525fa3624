//! CoprHD command line
//!
//! A thin shell over the resource client, the name resolver and the driver
//! facade. Every command prints pretty JSON on stdout; logs go to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use coprhd_driver::client::SnapshotParent;
use coprhd_driver::driver::common::{bytes_to_gib_ceil, delete_volumes, gib_to_bytes, parse_capacity};
use coprhd_driver::{
    ControllerClient, DriverConfig, DriverFactory, Error, ExportOrchestrator, InitiatorSpec, Protocol,
    Resolver, TaskWaiter, TenantRef, VolumeCreateParam,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// CoprHD block storage command line
#[derive(Parser, Debug)]
#[command(name = "coprhd", author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "COPRHD_CONFIG")]
    config: Option<PathBuf>,

    /// Controller host name
    #[arg(long, env = "COPRHD_HOSTNAME")]
    hostname: Option<String>,

    /// Controller REST port
    #[arg(long, env = "COPRHD_PORT")]
    port: Option<u16>,

    #[arg(long, env = "COPRHD_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "COPRHD_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[arg(long, env = "COPRHD_TENANT")]
    tenant: Option<String>,

    #[arg(long, env = "COPRHD_PROJECT")]
    project: Option<String>,

    #[arg(long, env = "COPRHD_VARRAY")]
    varray: Option<String>,

    /// Directory holding the session cookie file
    #[arg(long, env = "COPRHD_CLI_INSTALL_DIR")]
    cookie_dir: Option<PathBuf>,

    /// Accept invalid controller certificates
    #[arg(long)]
    insecure: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Print REST metrics to stderr when the command finishes
    #[arg(long)]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in and store the session token
    Authenticate,
    /// End the session and remove the cookie file
    Logout,
    Tenant {
        #[command(subcommand)]
        command: TenantCommand,
    },
    Project {
        #[command(subcommand)]
        command: ListCommand,
    },
    Varray {
        #[command(subcommand)]
        command: ListCommand,
    },
    Vpool {
        #[command(subcommand)]
        command: ListCommand,
    },
    Storagesystem {
        #[command(subcommand)]
        command: ListCommand,
    },
    Volume {
        #[command(subcommand)]
        command: VolumeCommand,
    },
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
    Export {
        #[command(subcommand)]
        command: ExportCommand,
    },
    /// Capacity report of the configured project
    Stats {
        #[arg(long, default_value = "iscsi")]
        protocol: String,
    },
}

#[derive(Subcommand, Debug)]
enum TenantCommand {
    /// Show a tenant (the configured one by default)
    Show { name: Option<String> },
}

#[derive(Subcommand, Debug)]
enum ListCommand {
    List,
}

#[derive(Subcommand, Debug)]
enum VolumeCommand {
    Create {
        name: String,
        /// Size such as 10G, 512Mi or 1Ti
        #[arg(long)]
        size: String,
        #[arg(long)]
        vpool: String,
        #[arg(long)]
        consistency_group: Option<String>,
        /// Wait for the task to finish
        #[arg(long)]
        sync: bool,
    },
    Show {
        name: String,
    },
    List,
    Delete {
        #[arg(required = true)]
        names: Vec<String>,
        #[arg(long)]
        sync: bool,
    },
    Expand {
        name: String,
        #[arg(long)]
        size: String,
        #[arg(long)]
        sync: bool,
    },
    Tasks {
        name: String,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommand {
    Create {
        volume: String,
        name: String,
        #[arg(long)]
        sync: bool,
    },
    List {
        volume: String,
    },
    Delete {
        volume: String,
        name: String,
        #[arg(long)]
        sync: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ExportCommand {
    /// Export a volume to a host and print its ITLs
    Attach {
        volume: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "iscsi")]
        protocol: String,
        /// Initiator port (IQN, WWPN or SDC id); repeatable
        #[arg(long = "initiator", required = true)]
        initiators: Vec<String>,
    },
    Detach {
        volume: String,
        #[arg(long = "initiator", required = true)]
        initiators: Vec<String>,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let config = load_config(&args)?;
    config.validate()?;
    info!("coprhd {} against {}", coprhd_driver::VERSION, config.base_url());

    let client = ControllerClient::connect(&config).await?;
    let outcome = run(&args.command, &config, &client).await;

    if args.print_metrics {
        eprintln!("{}", client.metrics().render()?);
    }
    outcome
}

fn load_config(args: &Args) -> anyhow::Result<DriverConfig> {
    let mut config = match &args.config {
        Some(path) => DriverConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DriverConfig::default(),
    };

    let overrides = [
        (&args.hostname, &mut config.hostname),
        (&args.username, &mut config.username),
        (&args.password, &mut config.password),
        (&args.tenant, &mut config.tenant),
        (&args.project, &mut config.project),
        (&args.varray, &mut config.varray),
    ];
    for (value, field) in overrides {
        if let Some(value) = value {
            *field = value.clone();
        }
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if args.cookie_dir.is_some() {
        config.cookie_dir = args.cookie_dir.clone();
    }
    if args.insecure {
        config.verify_certificate = false;
    }
    Ok(config)
}

async fn run(command: &Command, config: &DriverConfig, client: &ControllerClient) -> anyhow::Result<()> {
    let resolver = Resolver::new(client.clone());
    let waiter = TaskWaiter::from_config(client.clone(), config);
    let tenant = TenantRef::from_name(&config.tenant);

    match command {
        Command::Authenticate => {
            client.authenticate().await?;
            print_json(&serde_json::json!({ "authenticated": config.hostname }))
        }
        Command::Logout => {
            client.logout().await?;
            print_json(&serde_json::json!({ "logged_out": config.hostname }))
        }
        Command::Tenant {
            command: TenantCommand::Show { name },
        } => {
            let tenant = match name {
                Some(name) => TenantRef::from_name(name),
                None => tenant,
            };
            let id = resolver.tenant_id(&tenant).await?;
            print_json(&client.tenants().show(&id).await?)
        }
        Command::Project { .. } => {
            let tenant_id = resolver.tenant_id(&tenant).await?;
            print_json(&client.tenants().projects(&tenant_id).await?)
        }
        Command::Varray { .. } => print_json(&client.varrays().list().await?),
        Command::Vpool { .. } => print_json(&client.vpools().list().await?),
        Command::Storagesystem { .. } => print_json(&client.storage_systems().list().await?),
        Command::Volume { command } => {
            let project_id = resolver.project_id(&tenant, &config.project).await?;
            run_volume(command, config, client, &resolver, &waiter, &project_id).await
        }
        Command::Snapshot { command } => {
            let project_id = resolver.project_id(&tenant, &config.project).await?;
            run_snapshot(command, client, &resolver, &waiter, &project_id).await
        }
        Command::Export { command } => {
            let project_id = resolver.project_id(&tenant, &config.project).await?;
            let exports = ExportOrchestrator::new(client.clone(), waiter.clone(), config);
            match command {
                ExportCommand::Attach {
                    volume,
                    host,
                    protocol,
                    initiators,
                } => {
                    let protocol: Protocol = protocol.parse()?;
                    let volume_id = resolver.volume_id(&project_id, volume).await?;
                    let itls = exports
                        .attach(&volume_id, protocol, &initiator_specs(initiators), host)
                        .await?;
                    print_json(&itls)
                }
                ExportCommand::Detach { volume, initiators } => {
                    let volume_id = resolver.volume_id(&project_id, volume).await?;
                    let outcome = exports.detach(&volume_id, &initiator_specs(initiators)).await?;
                    print_json(&serde_json::json!({
                        "itls": outcome.itls,
                        "remaining_volumes": outcome.remaining_volumes,
                    }))
                }
            }
        }
        Command::Stats { protocol } => {
            let driver = DriverFactory::create(protocol, config.clone()).await?;
            print_json(&driver.get_volume_stats(true).await?)
        }
    }
}

async fn run_volume(
    command: &VolumeCommand,
    config: &DriverConfig,
    client: &ControllerClient,
    resolver: &Resolver,
    waiter: &TaskWaiter,
    project_id: &str,
) -> anyhow::Result<()> {
    match command {
        VolumeCommand::Create {
            name,
            size,
            vpool,
            consistency_group,
            sync,
        } => {
            resolver.ensure_volume_absent(project_id, name).await?;
            let consistency_group = match consistency_group {
                Some(group) => Some(resolver.consistency_group_id(project_id, group).await?),
                None => None,
            };
            let param = VolumeCreateParam {
                name: name.clone(),
                size: gib_to_bytes(bytes_to_gib_ceil(parse_capacity(size)?)).to_string(),
                count: 1,
                project: project_id.to_string(),
                varray: resolver.varray_id(&config.varray).await?,
                vpool: resolver.vpool_id(vpool).await?,
                consistency_group,
            };
            let mut tasks = client.volumes().create(&param).await?;
            if *sync {
                tasks = waiter.wait_all_ready(&tasks).await?;
            }
            print_json(&tasks)
        }
        VolumeCommand::Show { name } => match resolver.find_volume(project_id, name).await? {
            Some(volume) => print_json(&volume),
            None => Err(Error::not_found("volume", name).into()),
        },
        VolumeCommand::List => print_json(&resolver.project_volumes(project_id).await?),
        VolumeCommand::Delete { names, sync } => {
            let tasks = delete_volumes(client, resolver, waiter, project_id, names, *sync).await?;
            print_json(&tasks)
        }
        VolumeCommand::Expand { name, size, sync } => {
            let volume_id = resolver.volume_id(project_id, name).await?;
            let bytes = gib_to_bytes(bytes_to_gib_ceil(parse_capacity(size)?));
            let mut tasks = client.volumes().expand(&volume_id, bytes).await?;
            if *sync {
                tasks = waiter.wait_all_ready(&tasks).await?;
            }
            print_json(&tasks)
        }
        VolumeCommand::Tasks { name } => {
            let volume_id = resolver.volume_id(project_id, name).await?;
            print_json(&client.volumes().tasks(&volume_id).await?)
        }
    }
}

async fn run_snapshot(
    command: &SnapshotCommand,
    client: &ControllerClient,
    resolver: &Resolver,
    waiter: &TaskWaiter,
    project_id: &str,
) -> anyhow::Result<()> {
    match command {
        SnapshotCommand::Create { volume, name, sync } => {
            let volume_id = resolver.volume_id(project_id, volume).await?;
            if resolver.snapshot_id(&volume_id, name).await.is_ok() {
                bail!(Error::AlreadyExists {
                    kind: "snapshot".into(),
                    name: name.clone(),
                });
            }
            let mut tasks = client
                .snapshots()
                .create(SnapshotParent::Volume, &volume_id, name)
                .await?;
            if *sync {
                tasks = waiter.wait_all_ready(&tasks).await?;
            }
            print_json(&tasks)
        }
        SnapshotCommand::List { volume } => {
            let volume_id = resolver.volume_id(project_id, volume).await?;
            print_json(&client.snapshots().list(SnapshotParent::Volume, &volume_id).await?)
        }
        SnapshotCommand::Delete { volume, name, sync } => {
            let volume_id = resolver.volume_id(project_id, volume).await?;
            let snapshot_id = resolver.snapshot_id(&volume_id, name).await?;
            let mut tasks = client
                .snapshots()
                .deactivate(SnapshotParent::Volume, &snapshot_id)
                .await?;
            if *sync {
                tasks = waiter.wait_all_ready(&tasks).await?;
            }
            print_json(&tasks)
        }
    }
}

fn initiator_specs(ports: &[String]) -> Vec<InitiatorSpec> {
    ports.iter().map(InitiatorSpec::port).collect()
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "error" => Level::ERROR,
        _ => Level::WARN,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn", "rustls=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
