//! Flow table simulator
//!
//! Usage: flowsim [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>  Path to configuration file
//!   -g, --generate       Generate a default configuration
//!   -h, --help           Print help information

use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Serialize};

use flowcore::clock::{Clock, MonotonicClock};
use flowcore::flow::{proto, FlowKey, FlowTableConfigFile, FlowTableManager, PacketBatch};
use flowcore::reaper;

/// Largest synthetic payload
const MAX_PAYLOAD: usize = 1500;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; respects RUST_LOG (e.g. RUST_LOG=debug)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "-h" | "--help" => {
            print_usage();
        }
        "-g" | "--generate" => {
            generate_config()?;
        }
        "-c" | "--config" => {
            if args.len() < 3 {
                eprintln!("Error: --config requires a file path");
                return Ok(());
            }
            run_simulation(&args[2]).await?;
        }
        _ => {
            eprintln!("Unknown option: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!(
        r#"flowsim - flow table simulator

USAGE:
    flowsim [OPTIONS]

OPTIONS:
    -c, --config <FILE>     Path to configuration file
    -g, --generate          Generate a default configuration
    -h, --help              Print help information

EXAMPLES:
    Generate a configuration:
        flowsim --generate > flowsim.toml

    Run the simulation:
        flowsim --config flowsim.toml
"#
    );
}

/// Simulation configuration file.
#[derive(Debug, Serialize, Deserialize)]
struct SimulationFile {
    table: FlowTableConfigFile,
    #[serde(default)]
    traffic: TrafficParams,
}

/// Synthetic traffic shape.
#[derive(Debug, Serialize, Deserialize)]
#[serde(default)]
struct TrafficParams {
    /// Worker threads classifying batches
    workers: usize,
    /// Long-lived flows shared by all workers
    flows: usize,
    /// Packets per batch
    batch_size: usize,
    /// Longest run of consecutive packets of one flow
    max_run: usize,
    /// Probability that a run belongs to a short-lived flow
    new_flow_ratio: f64,
    /// Simulation length (seconds)
    duration_secs: u64,
}

impl Default for TrafficParams {
    fn default() -> Self {
        Self {
            workers: 4,
            flows: 10_000,
            batch_size: 32,
            max_run: 8,
            new_flow_ratio: 0.05,
            duration_secs: 5,
        }
    }
}

/// Per-flow state kept by the simulated downstream element.
#[derive(Debug, Default)]
struct FlowStats {
    bytes: u64,
    next_seq: u32,
}

struct Packet {
    key: FlowKey,
    payload: Bytes,
}

fn generate_config() -> anyhow::Result<()> {
    let file = SimulationFile {
        table: FlowTableConfigFile {
            capacity: 65_536,
            reserve: 1024,
            timeout_ms: 2000,
            verbose: 0,
            flags: vec!["canonical".to_string()],
            retransmit_precision_ms: 1,
        },
        traffic: TrafficParams::default(),
    };

    println!("# flowsim configuration");
    println!();
    println!("{}", toml::to_string_pretty(&file)?);

    Ok(())
}

async fn run_simulation(config_path: &str) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(config_path)?;
    let file: SimulationFile = toml::from_str(&content)?;
    let config = file.table.to_config()?;
    let traffic = Arc::new(file.traffic);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let table: Arc<FlowTableManager<FlowStats>> =
        Arc::new(FlowTableManager::initialize(config, clock)?);

    let reaper_task = reaper::spawn_reaper(Arc::clone(&table));
    let driver_task = reaper::spawn_retransmit_driver(
        Arc::clone(table.retransmit_scheduler()),
        Duration::from_millis(table.config().retransmit_precision_ms.max(1)),
    );

    let pool = Arc::new(flow_pool(traffic.flows));
    let payload = Bytes::from(vec![0u8; MAX_PAYLOAD]);
    let deadline = Instant::now() + Duration::from_secs(traffic.duration_secs);

    tracing::info!(
        "Simulating {} workers over {} flows for {}s",
        traffic.workers,
        pool.len(),
        traffic.duration_secs
    );

    let workers: Vec<_> = (0..traffic.workers)
        .map(|_| {
            let table = Arc::clone(&table);
            let traffic = Arc::clone(&traffic);
            let pool = Arc::clone(&pool);
            let payload = payload.clone();
            tokio::task::spawn_blocking(move || run_worker(&table, &traffic, &pool, &payload, deadline))
        })
        .collect();

    let mut batches = 0u64;
    for worker in workers {
        batches += worker.await?;
    }

    reaper_task.abort();
    driver_task.abort();

    println!("Batches processed: {}", batches);
    for name in ["count", "capacity", "timeout", "evicted", "dropped"] {
        if let Some(value) = table.read_handler(name) {
            println!("{:>9}: {}", name, value);
        }
    }
    println!();
    println!("{}", table.metrics().format_report());

    Ok(())
}

fn run_worker(
    table: &FlowTableManager<FlowStats>,
    traffic: &TrafficParams,
    pool: &[FlowKey],
    payload: &Bytes,
    deadline: Instant,
) -> u64 {
    let mut rng = rand::thread_rng();
    let mut batches = 0;

    while Instant::now() < deadline {
        let mut batch = PacketBatch::with_capacity(traffic.batch_size);
        while batch.len() < traffic.batch_size {
            let key = if pool.is_empty() || rng.gen_bool(traffic.new_flow_ratio.clamp(0.0, 1.0)) {
                random_key(&mut rng)
            } else {
                pool[rng.gen_range(0..pool.len())]
            };
            for _ in 0..rng.gen_range(1..=traffic.max_run.max(1)) {
                let len = rng.gen_range(40..=MAX_PAYLOAD);
                batch.push(Packet {
                    key,
                    payload: payload.slice(..len),
                });
            }
        }

        let now = table.clock().now_ms();
        table.process_batch(batch, now, &|p: &Packet| Some(p.key), |fcb, packets| {
            let bytes: usize = packets.iter().map(|p| p.payload.len()).sum();

            let stats = fcb.state_mut();
            stats.bytes += bytes as u64;
            let seq = stats.next_seq;
            stats.next_seq = seq.wrapping_add(bytes as u32);

            // One RTT sample per round: each sub-batch acknowledges the previous one
            let timing = fcb.timing_mut();
            if timing.is_measure_in_progress() {
                timing.signal_ack(seq);
            } else {
                timing.start_measure(seq);
            }
        });
        batches += 1;
    }

    batches
}

fn flow_pool(flows: usize) -> Vec<FlowKey> {
    let mut rng = rand::thread_rng();
    (0..flows).map(|_| random_key(&mut rng)).collect()
}

fn random_key(rng: &mut impl Rng) -> FlowKey {
    let src = IpAddr::V4(Ipv4Addr::from(rng.gen::<u32>()));
    let dst = IpAddr::V4(Ipv4Addr::new(10, 0, 0, rng.gen_range(1..=8)));
    let protocol = if rng.gen_bool(0.8) { proto::TCP } else { proto::UDP };

    FlowKey::new(src, rng.gen_range(1024..=u16::MAX), dst, 443, protocol)
}
