//! coherex: host/accelerator buffer coherence with a host worker pool
//!
//! This application exercises the coherence layer end to end: it discovers an
//! accelerator, keeps a buffer coherent while the device side rewrites it, runs
//! the matching host fallback on the worker pool and reports what moved where.
//!
//! # Features
//!
//! - Backend, platform and device-class selection from the command line or a JSON config
//! - Device round trip through the buffer cache with verification
//! - Chunked host fallback on the growable worker pool
//! - Transfer and pool statistics as log lines or JSON

use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use coherex::prelude::*;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    // Parse command line arguments
    let matches = Command::new("coherex")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Arcmoon Studios")
        .about("Host/accelerator buffer coherence and a growable host worker pool")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .help("JSON configuration file (command line flags override it)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("backend")
                .short('b')
                .long("backend")
                .help("Accelerator backend")
                .value_parser(["auto", "host", "opencl"]),
        )
        .arg(
            Arg::new("platform")
                .short('p')
                .long("platform")
                .help("Preferred platform name (case-insensitive substring)")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("device-class")
                .short('d')
                .long("device-class")
                .help("Preferred device class")
                .value_parser(["gpu", "accelerator", "cpu", "all"]),
        )
        .arg(
            Arg::new("devices")
                .short('n')
                .long("devices")
                .help("Number of devices emulated by the host backend")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .help("Buffer size in bytes")
                .default_value("1048576")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("threads")
                .short('j')
                .long("threads")
                .help("Worker threads to spawn up front (0 to grow on demand)")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print statistics as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose output")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = match matches.get_one::<String>("config") {
        Some(path) => Config::from_json_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => Config::new(),
    };
    if let Some(backend) = matches.get_one::<String>("backend") {
        config = config.with_backend(match backend.as_str() {
            "host" => BackendKind::Host,
            "opencl" => BackendKind::OpenCL,
            _ => BackendKind::Auto,
        });
    }
    if let Some(platform) = matches.get_one::<String>("platform") {
        config = config.with_preferred_platform(platform.clone());
    }
    if let Some(class) = matches.get_one::<String>("device-class") {
        config = config.with_device_class(match class.as_str() {
            "accelerator" => DeviceClass::Accelerator,
            "cpu" => DeviceClass::Cpu,
            "all" => DeviceClass::All,
            _ => DeviceClass::Gpu,
        });
    }
    if let Some(devices) = matches.get_one::<usize>("devices") {
        config = config.with_emulated_devices(*devices);
    }
    if let Some(threads) = matches.get_one::<usize>("threads") {
        config = config.with_initial_threads(*threads);
    }
    if matches.get_flag("verbose") {
        config = config.with_verbose(true);
    }
    let size = matches.get_one::<usize>("size").copied().unwrap_or(1 << 20);
    let json = matches.get_flag("json");

    // Initialize logging
    let default_level = if config.verbose() { "debug" } else { "info" };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global default subscriber")?;

    // Display configuration
    info!("coherex Configuration:");
    info!("  Backend: {:?}", config.backend());
    info!(
        "  Preferred platform: {}",
        config.preferred_platform().unwrap_or("first available")
    );
    info!("  Device class: {}", config.device_class());
    info!("  Buffer size: {} bytes", size);

    info!("Initializing runtime...");
    let runtime = CoherexRuntime::new(config).context("Failed to initialize runtime")?;
    let context = runtime.context();
    info!(
        "Using platform '{}' ({}) with {} device(s)",
        context.platform().name,
        context.accelerator_type(),
        context.device_count()
    );
    for device in context.devices() {
        info!("  [{}] {} ({})", device.index, device.name, device.class);
    }

    // Device round trip
    let pattern: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
    let host = HostView::new(pattern.clone());
    let cache = runtime.create_buffer(host.clone())?;

    let start = Instant::now();
    cache.allocate_device()?;
    cache.with_device(|queue, memory| {
        let mut bytes = vec![0u8; memory.len()];
        queue.read_blocking(memory, &mut bytes)?;
        bytes.iter_mut().for_each(|b| *b = !*b);
        queue.write_blocking(memory, &bytes)
    })?;
    cache.ensure_host_current()?;
    info!("Device round trip completed in {:?}", start.elapsed());

    let inverted = host.to_vec();
    if inverted.iter().zip(&pattern).any(|(a, b)| *a != !*b) {
        bail!("Host copy does not match the device result");
    }

    // Move the buffer to the last device to exercise rebinding
    let last = context.device_count() as isize - 1;
    if last > 0 {
        cache.rebind_queue(last)?;
        cache.synchronize()?;
        info!("Buffer rebound to queue {}", cache.queue_index());
    }

    // Host fallback undoes the device step
    let start = Instant::now();
    let restored = runtime
        .multi_threader()
        .map_bytes(&inverted, |chunk| chunk.iter().map(|b| !*b).collect())?;
    info!("Host fallback completed in {:?}", start.elapsed());
    if restored != pattern {
        bail!("Host fallback result does not match the original pattern");
    }
    cache.write_host(|bytes| bytes.copy_from_slice(&restored))?;
    cache.synchronize()?;

    let stats = runtime.statistics();
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        info!("Statistics: {:#?}", stats);
    }

    drop(cache);
    if let Err(e) = runtime.shutdown() {
        warn!("Shutdown was not clean: {}", e);
    }

    info!("coherex completed successfully");
    Ok(())
}
