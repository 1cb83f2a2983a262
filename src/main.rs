use clap::{Parser, Subcommand};
use fecweave::app_config::AppConfig;
use fecweave::fec::{decoder_from_config, encoder_from_config, HEADER_SIZE};
use fecweave::optimize::MemoryPool;
use fecweave::telemetry;
use fecweave::{cpu_features, CpuFeature};
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Push random payloads through an encoder, a lossy channel and a
    /// decoder, and report what came out the other side
    Simulate {
        /// Data shards per group
        #[clap(long, default_value_t = 10)]
        data_shards: usize,

        /// Parity shards per group
        #[clap(long, default_value_t = 3)]
        parity_shards: usize,

        /// Application payload bytes per shard body
        #[clap(long, default_value_t = 1400)]
        payload_size: usize,

        /// Groups to push through the channel
        #[clap(long, default_value_t = 100)]
        groups: usize,

        /// Probability that any one shard is dropped
        #[clap(long, default_value_t = 0.1)]
        loss_rate: f64,

        /// Transport preamble bytes reserved in front of each data shard
        #[clap(long, default_value_t = 0)]
        reserve: usize,

        /// Seed for the payload and loss RNG; random if omitted
        #[clap(long)]
        seed: Option<u64>,

        /// Path to a TOML config; CLI geometry flags win over it
        #[clap(short, long)]
        config: Option<PathBuf>,

        /// Dump prometheus metrics after the run
        #[clap(long)]
        metrics: bool,
    },
    /// Print the CPU features the field-arithmetic kernels can use
    Features,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate {
            data_shards,
            parity_shards,
            payload_size,
            groups,
            loss_rate,
            reserve,
            seed,
            config,
            metrics,
        } => {
            let mut cfg = match config {
                Some(path) => AppConfig::from_file(&path)?,
                None => AppConfig::default(),
            };
            cfg.fec.data_shards = data_shards;
            cfg.fec.parity_shards = parity_shards;
            cfg.validate()?;
            if payload_size + HEADER_SIZE > cfg.optimize.block_size {
                return Err(format!(
                    "payload_size {} does not fit a pool block of {} bytes",
                    payload_size, cfg.optimize.block_size
                )
                .into());
            }
            if !(0.0..=1.0).contains(&loss_rate) {
                return Err(format!("loss_rate {} is not in [0, 1]", loss_rate).into());
            }
            run_simulation(&cfg, payload_size, groups, loss_rate, reserve, seed)?;
            if metrics {
                print!("{}", telemetry::metrics_text());
            }
        }
        Commands::Features => {
            let detector = cpu_features();
            for (name, feature) in [
                ("avx2", CpuFeature::AVX2),
                ("ssse3", CpuFeature::SSSE3),
                ("neon", CpuFeature::NEON),
            ] {
                println!(
                    "{:<8} {}",
                    name,
                    if detector.has_feature(feature) {
                        "yes"
                    } else {
                        "no"
                    }
                );
            }
        }
    }
    Ok(())
}

struct ChannelStats {
    data_sent: usize,
    parity_sent: usize,
    data_lost: usize,
    parity_lost: usize,
    recovered: usize,
}

fn run_simulation(
    cfg: &AppConfig,
    payload_size: usize,
    groups: usize,
    loss_rate: f64,
    reserve: usize,
    seed: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let seed = seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);
    info!(
        "simulating {} groups of {}+{} shards, {} byte payloads, loss {:.1}%, seed {}",
        groups,
        cfg.fec.data_shards,
        cfg.fec.parity_shards,
        payload_size,
        loss_rate * 100.0,
        seed
    );

    let pool = Arc::new(MemoryPool::from_cfg(&cfg.optimize));
    let mut encoder = encoder_from_config(&cfg.fec, 0, Arc::clone(&pool))?;
    let mut decoder = decoder_from_config(&cfg.fec, Arc::clone(&pool))?;

    let mut stats = ChannelStats {
        data_sent: 0,
        parity_sent: 0,
        data_lost: 0,
        parity_lost: 0,
        recovered: 0,
    };
    let mut payload = vec![0u8; reserve + HEADER_SIZE + payload_size];

    for _ in 0..groups {
        for _ in 0..cfg.fec.data_shards {
            rng.fill_bytes(&mut payload[reserve + HEADER_SIZE..]);
            let parity = encoder.encode(&mut payload, reserve)?;

            stats.data_sent += 1;
            if rng.gen_bool(loss_rate) {
                stats.data_lost += 1;
            } else {
                stats.recovered += decoder.decode(&payload[reserve..])?.len();
            }

            for shard in &parity {
                stats.parity_sent += 1;
                if rng.gen_bool(loss_rate) {
                    stats.parity_lost += 1;
                } else {
                    stats.recovered += decoder.decode(shard.as_bytes())?.len();
                }
            }
        }
    }

    let delivered = stats.data_sent - stats.data_lost;
    info!(
        "sent {} data + {} parity shards, lost {} + {}, delivered {} directly, recovered {} of {} lost data shards",
        stats.data_sent,
        stats.parity_sent,
        stats.data_lost,
        stats.parity_lost,
        delivered,
        stats.recovered,
        stats.data_lost
    );
    println!(
        "data shards: {} sent, {} lost in transit, {} recovered, {} unrecovered",
        stats.data_sent,
        stats.data_lost,
        stats.recovered,
        stats.data_lost - stats.recovered
    );
    Ok(())
}
