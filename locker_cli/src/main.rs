//! Process entry point: logging setup, config load, and supervisor launch.

mod cli;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing::info;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use locker_config::Config;
use locker_core::HardwareProfile;
use locker_core::supervisor;
use locker_hardware::{SimChannels, SimParams};
use locker_traits::{Channels, MonotonicClock};

fn init_tracing(json: bool, level: &str, log_dir: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    match log_dir {
        Some(dir) => {
            let file = tracing_appender::rolling::daily(dir, "locker.log");
            let (writer, guard) = tracing_appender::non_blocking(file);
            let _ = cli::FILE_GUARD.set(guard);
            let builder = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
        None => {
            let builder = tracing_subscriber::fmt().with_env_filter(filter);
            if json {
                builder.json().init();
            } else {
                builder.init();
            }
        }
    }
}

/// Build a simulated channel layer for this installation, seeded so the
/// status gate passes out of the box.
fn build_sim(cfg: &Config, delay_ns: f64, offset_ns: f64) -> Box<dyn Channels + Send> {
    let profile = HardwareProfile::for_generation(cfg.locker.generation);
    let mean = if cfg.locker.reverse_counter {
        "GetOffsetInvMeasMean"
    } else {
        "GetMeasMean"
    };
    let counter_mean = format!("{}{mean}", cfg.channels.counter);
    let sim = SimChannels::new(SimParams {
        phase_motor: cfg.channels.phase_motor.clone(),
        laser_trigger: cfg.channels.laser_trigger.clone(),
        counter_mean: counter_mean.clone(),
        delay_ns,
        offset_ns,
        period_ns: profile.phase_wrap_ns(),
        trigger_scale: if cfg.locker.trig_in_ticks {
            1000.0 / 119.0
        } else {
            1.0
        },
    });
    let handle = sim.handle();
    handle.set(&format!("{}PHASE_LOCKED", cfg.channels.device_base), 1.0);
    handle.set(&format!("{counter_mean}.LOW"), -1.0);
    handle.set(&format!("{counter_mean}.HIGH"), 1.0);
    handle.set(&format!("{}GetMeasJitter.HIGH", cfg.channels.counter), 1e-9);
    Box::new(sim)
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Cli::parse();
    init_tracing(args.json, &args.log_level, args.log_dir.as_deref());

    let doc = fs::read_to_string(&args.config)
        .wrap_err_with(|| format!("reading config {}", args.config.display()))?;
    let cfg = locker_config::load(&doc)
        .wrap_err_with(|| format!("loading config {}", args.config.display()))?;

    match args.cmd {
        Commands::CheckConfig => {
            println!(
                "{}: generation {:?}, device base {}, counter {}",
                cfg.locker.name,
                cfg.locker.generation,
                cfg.channels.device_base,
                cfg.channels.counter
            );
            Ok(())
        }
        Commands::Run {
            sim,
            sim_delay_ns,
            sim_offset_ns,
        } => {
            if !sim {
                eyre::bail!(
                    "no live control-system backend is compiled into this build; \
                     run with --sim to use the built-in simulator"
                );
            }
            let shutdown = Arc::new(AtomicBool::new(false));
            let flag = Arc::clone(&shutdown);
            ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
                .wrap_err("installing the shutdown handler")?;

            info!(name = %cfg.locker.name, "starting supervisor");
            let clock = MonotonicClock::new();
            supervisor::run(
                || Ok(build_sim(&cfg, sim_delay_ns, sim_offset_ns)),
                &cfg,
                &clock,
                &shutdown,
            )
        }
    }
}
