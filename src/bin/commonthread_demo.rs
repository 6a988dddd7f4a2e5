//! # CommonThread Demo
//!
//! Runs a clock producer feeding a queue of timestamps, consumers printing
//! them, and a task that reports controller status once a day. Stops on
//! SIGTERM/Ctrl+C, or when `--run-for` elapses.

use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

use commonthread::config::RuntimeConfig;
use commonthread::controller::Controller;
use commonthread::logging::init_structured_logging;
use commonthread::pool::Role;
use commonthread::scheduler;

#[derive(Parser)]
#[command(name = "commonthread-demo")]
#[command(about = "Producer/consumer demo on the CommonThread runtime")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file; environment overrides still apply
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Producer workers
    #[arg(long, default_value_t = 1)]
    producers: usize,

    /// Consumer workers
    #[arg(long, default_value_t = 2)]
    consumers: usize,

    /// Bound the timestamp queue to this many items
    #[arg(long)]
    capacity: Option<usize>,

    /// Stop every pool after this many seconds
    #[arg(long)]
    run_for: Option<u64>,

    /// Seconds between self-healing passes over all pools
    #[arg(long, default_value_t = 10)]
    refresh_every: u64,
}

fn main() {
    let cli = Cli::parse();

    let config = match RuntimeConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {e}");
            process::exit(1);
        }
    };
    init_structured_logging(&config.logging_config());

    if let Err(e) = run(&cli, &config) {
        error!("❌ DEMO: {e}");
        process::exit(1);
    }
}

fn run(cli: &Cli, config: &RuntimeConfig) -> commonthread::Result<()> {
    info!(application = %config.application, "🚀 DEMO: Starting");

    let controller = Controller::from_config(config, None)?;
    controller.create_queue("timestamps", cli.capacity);

    let mut producer = controller.pool_config("clock")?.with_workers(cli.producers);
    let mut consumer = controller.pool_config("printer")?.with_workers(cli.consumers);
    let mut task = controller.pool_config("reporter")?.with_workers(1);
    if let Some(seconds) = cli.run_for {
        let deadline = scheduler::from_now(scheduler::seconds(seconds));
        producer = producer.with_loop_until(deadline);
        consumer = consumer.with_loop_until(deadline);
        task = task.with_loop_until(deadline);
    }

    controller.create_pool(Role::Producer, "clock", producer)?;
    controller.create_pool(Role::Consumer, "printer", consumer)?;
    controller.create_pool(Role::Task, "reporter", task)?;

    controller.install_signal_handlers()?;
    info!("✅ DEMO: Running. Press Ctrl+C to shut down gracefully, twice to kill");

    let refresh_every = cli.refresh_every.max(1);
    let mut ticks = 0u64;
    while controller.live_workers() > 0 {
        thread::sleep(Duration::from_secs(1));
        ticks += 1;
        if ticks % refresh_every == 0 {
            controller.refresh();
        }
        if cli.run_for.is_some_and(|seconds| ticks >= seconds) {
            // Blocked consumers never pass their deadline check on their own.
            controller.shutdown();
        }
    }

    let stats = controller.stats();
    info!(
        total_jobs = stats.total(),
        stats = %serde_json::to_string(&stats).unwrap_or_default(),
        "🏁 DEMO: All pools stopped"
    );
    Ok(())
}
