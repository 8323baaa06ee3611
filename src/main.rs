//! SetuIO - link daemon
//!
//! Brings up one link session from a TOML config: setup, handshake, optional
//! UDP switch, then receives and records inbound frames until Ctrl-C. When
//! the session has outputs, a zero frame is sent every cycle to keep the
//! peer fed.
//!
//! `--dump FILE --values N` prints a recorded log instead.

use clap::Parser;
use setu_io::error::{Error, Result};
use setu_io::recorder::read_records;
use setu_io::{Config, Session};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// How often link statistics are logged
const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "setu-io")]
#[command(about = "Handshaked numeric frame link with background recording")]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a recorded binary log and exit
    #[arg(long, requires = "values")]
    dump: Option<PathBuf>,

    /// Values per record in the dumped log
    #[arg(long)]
    values: Option<usize>,

    /// Truncate today's log before recording
    #[arg(long)]
    clear_log: bool,

    /// Main loop rate in Hz
    #[arg(long, default_value = "100")]
    rate_hz: u32,
}

fn main() {
    let args = Args::parse();

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Logger first so validation warnings are not lost
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();
    config.validate()?;

    if let Some(path) = &args.dump {
        return dump(path, args.values.unwrap_or_default(), &config);
    }

    log::info!("SetuIO v{} starting...", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &args.config {
        log::info!("Using config: {}", path.display());
    }

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let mut session = Session::from_config(&config);
    if args.clear_log {
        session.clear_log()?;
    }

    session.setup(&config.link.address, config.link.port, config.role()?)?;
    session.handshake()?;
    if config.link.udp {
        session.tcp_to_udp()?;
    }
    session.start_receiver()?;
    if config.recorder.enabled {
        session.start_saver()?;
        if let Some(path) = session.log_path() {
            log::info!("Recording to {}", path.display());
        }
    }

    run_link(&session, &running, args.rate_hz);

    let stopped = session.stop_all();
    log::info!("Final stats: {}", session.stats());
    stopped
}

/// Poll inbound values and feed the peer until stopped
///
/// Send failures are logged and counted; only the stop flag ends the loop.
fn run_link(session: &Session, running: &AtomicBool, rate_hz: u32) {
    let period = Duration::from_secs(1) / rate_hz.max(1);
    let outputs = session.layout().map_or(0, |layout| layout.outputs);
    let idle = vec![0.0; outputs];
    let mut last_stats = Instant::now();
    let mut failing = false;

    log::info!("SetuIO running. Press Ctrl-C to stop.");
    while running.load(Ordering::Relaxed) {
        if let Some(values) = session.latest() {
            log::trace!("Inbound: {:?}", values);
        }
        if outputs > 0 {
            match session.send(&idle) {
                Ok(_) if failing => {
                    log::info!("Send recovered");
                    failing = false;
                }
                Ok(_) => {}
                Err(e) if failing => log::debug!("Send failed: {}", e),
                Err(e) => {
                    log::warn!("Send failed: {}", e);
                    failing = true;
                }
            }
        }
        if last_stats.elapsed() >= STATS_INTERVAL {
            log::info!("Link: {}", session.stats());
            last_stats = Instant::now();
        }
        thread::sleep(period);
    }
}

fn dump(path: &Path, values: usize, config: &Config) -> Result<()> {
    let records = read_records(path, values, config.link.byte_order)?;
    for record in &records {
        let line: Vec<String> = record.values.iter().map(|v| v.to_string()).collect();
        println!("{},{}", record.timestamp_us, line.join(","));
    }
    log::info!("{} records in {}", records.len(), path.display());
    Ok(())
}
