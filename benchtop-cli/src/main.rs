use std::path::PathBuf;
use std::time::Duration;

use devices::{Fleet, FleetConfig, Registry};
use emu::{Delay, Options, Server, ServerConfig, Target, Termination};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

/// Emulated bench instruments
#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve a single emulator
    Serve(ServeArgs),

    /// Start every emulator listed in a fleet file
    Fleet {
        /// JSON fleet file
        file: PathBuf,
    },

    /// List the known emulator types
    List,
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Emulator type (short name, alias or URN)
    kind: String,

    /// Interface to bind
    #[clap(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 picks a free port)
    #[clap(short, long, default_value_t = 5025)]
    port: u16,

    /// Line terminator (defaults to the type's family terminator)
    #[clap(short, long)]
    termination: Option<Termination>,

    /// Fixed delay before each message, in seconds
    #[clap(long, default_value_t = 0.0)]
    delay: f64,

    /// Random extra delay before each message, in seconds
    #[clap(long, default_value_t = 0.0)]
    jitter: f64,

    /// Emulator option, as `key=value` (repeatable)
    #[clap(short = 'o', long = "option", value_parser = Options::parse_pair)]
    options: Vec<(String, serde_json::Value)>,

    /// Build a separate instance for each connection
    #[clap(long)]
    per_connection: bool,
}

fn seconds(value: f64, what: &str) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .with_context(|| format!("invalid {what} {value}"))
}

/// Blocks until the process is interrupted
fn wait_for_interrupt() -> Result<()> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("failed to install interrupt handler")?;
    let _ = rx.recv();
    info!("interrupted, shutting down");
    Ok(())
}

fn serve(registry: &Registry, args: ServeArgs) -> Result<()> {
    let entry = registry.resolve(&args.kind)?;
    let options: Options = args.options.into_iter().collect();
    let target = if args.per_connection {
        let ctor = entry.constructor;
        Target::per_connection(move || ctor(options.clone()))
    } else {
        let dev = entry
            .build(options)
            .with_context(|| format!("failed to build {}", entry.name))?;
        Target::shared(dev)
    };
    let config = ServerConfig {
        name: entry.name.to_owned(),
        host: args.host,
        port: args.port,
        termination: args.termination.unwrap_or(entry.termination),
        delay: Delay::jittered(
            seconds(args.delay, "delay")?,
            seconds(args.jitter, "jitter")?,
        ),
    };
    let addr = format!("{}:{}", config.host, config.port);
    let termination = config.termination;
    let server = Server::bind(config, target)
        .with_context(|| format!("failed to bind {addr}"))?;
    let handle = server.spawn().context("failed to start server")?;
    info!(
        "{} ({}) listening on {} with {termination} termination",
        entry.name,
        entry.urn(),
        handle.local_addr()
    );

    wait_for_interrupt()?;
    handle.shutdown();
    Ok(())
}

fn fleet(registry: &Registry, file: PathBuf) -> Result<()> {
    let config = FleetConfig::load(&file)
        .with_context(|| format!("failed to load {file:?}"))?;
    let plans = config.resolve(registry)?;
    let fleet = Fleet::start(plans)?;
    info!("started {} emulators", fleet.servers().len());

    wait_for_interrupt()?;
    fleet.shutdown();
    Ok(())
}

fn list(registry: &Registry) {
    for e in registry.iter() {
        println!("{:<8} {}", e.name, e.urn());
        println!("         {}", e.description);
        if !e.aliases.is_empty() {
            println!("         aliases: {}", e.aliases.join(", "));
        }
    }
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("BENCHTOP_LOG", "info")
        .write_style_or("BENCHTOP_LOG", "always");
    env_logger::init_from_env(env);

    let args = Args::parse();
    let registry = Registry::default();
    match args.command {
        Command::Serve(s) => serve(&registry, s),
        Command::Fleet { file } => fleet(&registry, file),
        Command::List => {
            list(&registry);
            Ok(())
        }
    }
}
