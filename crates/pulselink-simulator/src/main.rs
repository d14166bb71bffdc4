//! Desktop host for the pulselink telemetry pipeline.
//!
//! Runs the full node on a PC: a synthetic climate sensor, a pulse generator
//! thread in place of the edge interrupt, the durable queue in a data
//! directory (or the volatile ring) and a stdout or TCP uplink.
//!
//! # Console
//!
//! | Line                        | Effect                   |
//! |-----------------------------|--------------------------|
//! | `ONLINE`                    | Intent on, connect+drain |
//! | `OFFLINE`                   | Intent off               |
//! | `SET_CONNECTED true\|false` | Same as above            |
//!
//! Node events and published records go to stdout; diagnostics go to stderr
//! (`RUST_LOG=debug` for more).

mod console;
mod fs_storage;
mod mock_sensor;
mod pulse;
mod uplink;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow};
use clap::{Parser, ValueEnum};
use embassy_futures::block_on;
use log::info;

use pulselink_core::command::ConnectivityIntent;
use pulselink_core::config::NodeConfig;
use pulselink_core::controller::DeliveryController;
use pulselink_core::events::{EventChannel, EventSubscriber};
use pulselink_core::node::Node;
use pulselink_core::queue::{BufferedQueue, DurableQueue, VolatileQueue};
use pulselink_core::uplink::Uplink;
use pulselink_core::windower::{PulseCounter, Windower};

use console::CommandChannel;
use fs_storage::FsStorage;
use mock_sensor::MockClimateSensor;
use uplink::{StdoutUplink, TcpUplink};

/// Main loop period; bounds how late a window boundary can be observed.
const LOOP_PERIOD: Duration = Duration::from_millis(50);

/// Connect and write timeout for the TCP collector.
const COLLECTOR_TIMEOUT: Duration = Duration::from_secs(2);

/// Every this many sensor reads fails, to exercise stale-value handling.
const MOCK_SENSOR_FAIL_EVERY: u64 = 7;

static EVENTS: EventChannel = EventChannel::new();
static PULSES: PulseCounter = PulseCounter::new();
static INTENT: ConnectivityIntent = ConnectivityIntent::new(false);
static COMMANDS: CommandChannel = CommandChannel::new();

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Newline-delimited file in the data directory, kept across restarts
    Durable,
    /// In-memory ring, lost on exit
    Volatile,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file; missing fields use the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the durable queue
    #[arg(long, default_value = "pulselink-data")]
    data_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = Backend::Durable)]
    backend: Backend,

    /// Collector address (host:port); records are printed to stdout if unset
    #[arg(long)]
    collector: Option<String>,

    /// Synthetic pulse rate, 0 for none
    #[arg(long, default_value_t = 72)]
    bpm: u32,

    /// Start with the connectivity intent on
    #[arg(long)]
    online: bool,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<NodeConfig> {
    let Some(path) = path else {
        return Ok(NodeConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    NodeConfig::from_json(&text).map_err(|e| anyhow!("{}: {}", path.display(), e))
}

fn print_events(subscriber: &mut EventSubscriber<'_>) {
    while let Some(event) = subscriber.try_next_message_pure() {
        println!("{}", event);
    }
}

fn run<Q: BufferedQueue, U: Uplink>(
    queue: Q,
    uplink: U,
    config: &NodeConfig,
    args: &Args,
) -> anyhow::Result<()> {
    let publisher = EVENTS
        .publisher()
        .map_err(|e| anyhow!("Event publisher unavailable: {:?}", e))?;
    let mut subscriber = EVENTS
        .subscriber()
        .map_err(|e| anyhow!("Event subscriber unavailable: {:?}", e))?;

    let start = Instant::now();
    let sensor = MockClimateSensor::new(Some(MOCK_SENSOR_FAIL_EVERY));
    let windower = Windower::new(sensor, &PULSES, config.sampling, 0);
    let controller = DeliveryController::new(queue, uplink, config.backoff, publisher);
    let mut node = Node::new(windower, controller, &INTENT);

    node.boot();
    print_events(&mut subscriber);

    let deadline = args.duration_secs.map(Duration::from_secs);
    loop {
        let tick_start = Instant::now();

        while let Ok(line) = COMMANDS.try_receive() {
            node.handle_command(&line);
        }

        let now_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        block_on(node.step(now_ms));
        print_events(&mut subscriber);

        if deadline.is_some_and(|d| start.elapsed() >= d) {
            break;
        }

        let elapsed = tick_start.elapsed();
        if elapsed < LOOP_PERIOD {
            std::thread::sleep(LOOP_PERIOD - elapsed);
        }
    }

    info!(
        "Simulator exiting with {} record(s) queued",
        node.controller().queue().len()
    );
    Ok(())
}

fn run_with_uplink<U: Uplink>(uplink: U, config: &NodeConfig, args: &Args) -> anyhow::Result<()> {
    let capacity = config.queue.capacity;
    match args.backend {
        Backend::Durable => {
            let storage = FsStorage::new(&args.data_dir);
            let queue = DurableQueue::open(storage, capacity).map_err(|e| {
                anyhow!(
                    "Failed to open queue in {}: {}",
                    args.data_dir.display(),
                    e
                )
            })?;
            run(queue, uplink, config, args)
        }
        Backend::Volatile => run(VolatileQueue::new(capacity), uplink, config, args),
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!("Starting pulselink simulator");
    info!(
        "Window {} ms, poll {} ms, capacity {}, backend {:?}",
        config.sampling.window_ms,
        config.sampling.poll_interval_ms,
        config.queue.capacity,
        args.backend
    );
    info!("Console: ONLINE | OFFLINE | SET_CONNECTED true|false");

    if args.online {
        INTENT.set(true);
    }
    let _pulses = pulse::spawn_pulse_generator(&PULSES, args.bpm);
    let _console = console::spawn_console(&COMMANDS);

    match &args.collector {
        Some(collector) => run_with_uplink(
            TcpUplink::new(collector.as_str(), COLLECTOR_TIMEOUT),
            &config,
            &args,
        ),
        None => run_with_uplink(StdoutUplink::new(), &config, &args),
    }
}
