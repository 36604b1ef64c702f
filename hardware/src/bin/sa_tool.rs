//! CLI tool for LibreVNA spectrum analyzer capture and inspection.
//!
//! Subcommands:
//! - `capture`: Continuous averaged capture into rotating storage units
//! - `info`: Query device identification, limits and status
//! - `devices`: List instruments visible to the GUI
//! - `query`: Send a raw SCPI command or query
//! - `trace`: Fetch one spectrum analyzer trace
//! - `archive`: Summarize captured storage units

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use spectrum_hardware::acquisition::{
    locate_files, AcquisitionConfig, AcquisitionLoop, CaptureArchive, JsonStorage,
};
use spectrum_hardware::gui::GuiLauncher;
use spectrum_hardware::librevna::{
    Detector, Lenient, LibreVna, Port, Window, DEFAULT_HOST, DEFAULT_PORT,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// LibreVNA Spectrum Analyzer Tool
#[derive(Parser, Debug)]
#[command(name = "sa_tool")]
#[command(about = "Spectrum capture and control for LibreVNA through the LibreVNA-GUI")]
#[command(version)]
struct Args {
    /// Host running the LibreVNA-GUI SCPI server
    #[arg(long, global = true, default_value = DEFAULT_HOST)]
    host: String,

    /// SCPI server TCP port
    #[arg(long, global = true, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Response timeout in milliseconds
    #[arg(long, global = true, default_value = "1000")]
    timeout_ms: u64,

    /// Pause between a setting and its verification query, in milliseconds
    #[arg(long, global = true, default_value = "200")]
    settle_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture averaged spectra continuously until Ctrl+C
    Capture(CaptureArgs),

    /// Query device info, limits and status flags
    Info,

    /// List instruments visible to the GUI
    Devices,

    /// Send a raw SCPI query (or command with --cmd) and print the response
    Query {
        /// SCPI text, e.g. ":SA:ACQ:RBW?"
        text: String,

        /// Send as a command expecting an empty acknowledgement
        #[arg(long)]
        cmd: bool,
    },

    /// Fetch one spectrum analyzer trace
    Trace {
        /// Instrument port (1 or 2)
        #[arg(short, long, default_value = "1")]
        port: u8,

        /// Write CSV to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Summarize captured storage units in a directory
    Archive {
        /// Directory containing storage unit files
        #[arg(default_value = "out")]
        dir: PathBuf,

        /// Port to load (1 or 2)
        #[arg(short, long, default_value = "1")]
        port: u8,

        /// Write the mean spectrum as CSV to this file
        #[arg(short, long)]
        mean: Option<PathBuf>,
    },
}

#[derive(ClapArgs, Debug)]
struct CaptureArgs {
    /// JSON configuration file (defaults are used for missing fields)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Start frequency in MHz
    #[arg(long)]
    start: Option<f64>,

    /// Stop frequency in MHz
    #[arg(long)]
    stop: Option<f64>,

    /// Resolution bandwidth in kHz
    #[arg(long)]
    rbw: Option<f64>,

    /// Window (KAISER, HANN, FLATTOP, NONE)
    #[arg(long)]
    window: Option<String>,

    /// Detector (+PEAK, -PEAK, NORMAL, SAMPLE, AVERAGE)
    #[arg(long, allow_hyphen_values = true)]
    detector: Option<String>,

    /// Sweeps per averaging cycle
    #[arg(long)]
    navg: Option<u32>,

    /// Capture blocks per storage unit
    #[arg(long)]
    blocks: Option<usize>,

    /// Output directory for storage units
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Disable signal identification
    #[arg(long)]
    no_signal_id: bool,

    /// Instrument serial to attach (any instrument if omitted)
    #[arg(long)]
    serial: Option<String>,

    /// Launch the LibreVNA-GUI binary at this path before connecting
    #[arg(long)]
    launch_gui: Option<PathBuf>,

    /// Seconds to wait after launching the GUI
    #[arg(long, default_value = "1.0")]
    gui_delay: f64,

    /// Write the effective configuration to this file and exit
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match &args.command {
        Command::Capture(capture) => cmd_capture(&args, capture),
        Command::Info => cmd_info(&args),
        Command::Devices => cmd_devices(&args),
        Command::Query { text, cmd } => cmd_query(&args, text, *cmd),
        Command::Trace { port, output } => cmd_trace(&args, *port, output.as_deref()),
        Command::Archive { dir, port, mean } => cmd_archive(dir, *port, mean.as_deref()),
    }
}

fn connect(args: &Args) -> Result<LibreVna> {
    info!("Connecting to LibreVNA-GUI at {}:{}...", args.host, args.port);
    let mut vna = LibreVna::connect(&args.host, args.port)?;
    vna.device()
        .set_timeout(Duration::from_millis(args.timeout_ms));
    vna.set_settle_time(Duration::from_millis(args.settle_ms));
    Ok(vna)
}

/// Set a flag on Ctrl+C, using a single-threaded tokio runtime on a helper thread.
fn install_stop_handler() -> Result<Arc<AtomicBool>> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = stop.clone();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to build signal runtime")?;

    std::thread::spawn(move || match runtime.block_on(tokio::signal::ctrl_c()) {
        Ok(()) => {
            info!("Ctrl+C received, stopping after the current exchange");
            flag.store(true, Ordering::SeqCst);
        }
        Err(e) => warn!("Unable to listen for Ctrl+C: {}", e),
    });

    Ok(stop)
}

fn lenient_value<T: Copy + std::fmt::Display>(what: &str, parsed: Lenient<T>) -> T {
    if let Lenient::Unrecognized { input, fallback } = &parsed {
        warn!("Unknown {} {:?}, using {}", what, input, fallback);
    }
    parsed.value()
}

fn build_config(capture: &CaptureArgs) -> Result<AcquisitionConfig> {
    let mut config = match &capture.config {
        Some(path) => AcquisitionConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AcquisitionConfig::default(),
    };

    if let Some(start) = capture.start {
        config.start_mhz = start;
    }
    if let Some(stop) = capture.stop {
        config.stop_mhz = stop;
    }
    if let Some(rbw) = capture.rbw {
        config.rbw_khz = rbw;
    }
    if let Some(window) = &capture.window {
        config.window = lenient_value("window", Window::from_input(window));
    }
    if let Some(detector) = &capture.detector {
        config.detector = lenient_value("detector", Detector::from_input(detector));
    }
    if let Some(navg) = capture.navg {
        config.average_count = navg;
    }
    if let Some(blocks) = capture.blocks {
        config.blocks_per_unit = blocks;
    }
    if let Some(out) = &capture.out {
        config.output_dir = out.clone();
    }
    if capture.no_signal_id {
        config.signal_id = false;
    }

    config.validate()?;
    Ok(config)
}

// ==================== Capture Command ====================

fn cmd_capture(args: &Args, capture: &CaptureArgs) -> Result<()> {
    let config = build_config(capture)?;

    if let Some(path) = &capture.save_config {
        config.save(path)?;
        info!("Configuration written to {}", path.display());
        return Ok(());
    }

    info!(
        "Capture: {:.3}-{:.3} MHz, RBW {} kHz, window {}, detector {}, navg {}, {} blocks per unit",
        config.start_mhz,
        config.stop_mhz,
        config.rbw_khz,
        config.window,
        config.detector,
        config.average_count,
        config.blocks_per_unit
    );

    if let Some(gui) = &capture.launch_gui {
        let delay = Duration::try_from_secs_f64(capture.gui_delay)
            .context("invalid --gui-delay")?;
        GuiLauncher::new(gui)
            .startup_delay(delay)
            .launch()
            .with_context(|| format!("launching {}", gui.display()))?;
    }

    let mut vna = connect(args)?;
    vna.connect_device(capture.serial.as_deref())?;

    let stop = install_stop_handler()?;
    let storage = JsonStorage::new(&config.output_dir);
    let mut acquisition = AcquisitionLoop::new(vna, storage, config)?;
    let summary = acquisition.run(&stop)?;

    info!(
        "Captured {} blocks into {} units ({} timeouts, {} discarded cycles)",
        summary.blocks, summary.units, summary.timeouts, summary.discarded_cycles
    );
    Ok(())
}

// ==================== Info Commands ====================

fn cmd_info(args: &Args) -> Result<()> {
    let mut vna = connect(args)?;

    info!("=== Device Info ===");
    info!("IDN: {}", vna.idn()?);
    let dev = vna.info()?;
    info!("Firmware: {}", dev.firmware);
    info!("Hardware revision: {}", dev.hardware_revision);
    info!(
        "Temperatures: source {:.1} °C, LO {:.1} °C, CPU {:.1} °C",
        dev.temperatures.source, dev.temperatures.lo, dev.temperatures.cpu
    );

    info!("=== Limits ===");
    info!(
        "Frequency: {:.3}-{:.3} MHz",
        dev.min_frequency_hz / 1e6,
        dev.max_frequency_hz / 1e6
    );
    info!("Max points: {}", dev.max_points);
    info!(
        "Power: {:.1} to {:.1} dBm",
        dev.min_power_dbm, dev.max_power_dbm
    );
    info!(
        "RBW: {:.1}-{:.1} kHz",
        dev.min_rbw_hz / 1e3,
        dev.max_rbw_hz / 1e3
    );

    info!("=== Status ===");
    let mode = vna.mode()?;
    info!("Mode: {} ({})", mode, mode.description());
    info!("Reference input: {}", vna.reference_input()?);
    info!("PLL unlocked: {}", vna.pll_unlocked()?);
    info!("ADC overload: {}", vna.adc_overload()?);
    info!("Unleveled: {}", vna.unleveled()?);

    info!("=== Spectrum Analyzer ===");
    info!(
        "Span: {:.3}-{:.3} MHz",
        vna.start_hz()? / 1e6,
        vna.stop_hz()? / 1e6
    );
    info!("RBW: {:.1} kHz", vna.rbw_hz()? / 1e3);
    info!("Window: {}", vna.window()?);
    info!("Detector: {}", vna.detector()?);
    info!(
        "Averaging: {}/{}",
        vna.current_average()?,
        vna.average_count()?
    );
    info!("Signal ID: {}", vna.signal_id()?);
    info!("Traces: {:?}", vna.trace_names()?);
    Ok(())
}

fn cmd_devices(args: &Args) -> Result<()> {
    let mut vna = connect(args)?;
    let devices = vna.list_devices()?;
    if devices.is_empty() {
        info!("No instruments found");
    }
    for serial in devices {
        println!("{serial}");
    }
    Ok(())
}

fn cmd_query(args: &Args, text: &str, as_command: bool) -> Result<()> {
    let mut vna = connect(args)?;
    if as_command {
        vna.device().cmd(text)?;
        info!("OK");
    } else {
        println!("{}", vna.device().query(text)?);
    }
    Ok(())
}

// ==================== Trace Command ====================

fn cmd_trace(args: &Args, port: u8, output: Option<&Path>) -> Result<()> {
    let port = Port::try_from(port)?;
    let mut vna = connect(args)?;
    let samples = vna.port_trace(port)?;
    info!("Fetched {} samples from {}", samples.len(), port.trace_name());

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(std::io::stdout().lock()),
    };
    writeln!(writer, "frequency_hz,dbm")?;
    for s in &samples {
        writeln!(writer, "{},{}", s.frequency, s.dbm)?;
    }
    writer.flush()?;

    if let Some(path) = output {
        info!("Trace written to {}", path.display());
    }
    Ok(())
}

// ==================== Archive Command ====================

fn cmd_archive(dir: &Path, port: u8, mean: Option<&Path>) -> Result<()> {
    let port = Port::try_from(port)?;
    let files = locate_files(dir)?;
    info!("Found {} storage units in {}", files.len(), dir.display());

    let Some(archive) = CaptureArchive::load(&files, port) else {
        bail!("no readable storage units in {}", dir.display());
    };

    let meta = &archive.metadata;
    info!(
        "{} blocks x {} bins, {:.3}-{:.3} MHz, RBW {} kHz, window {}, detector {}, navg {}",
        archive.blocks(),
        archive.bins(),
        meta.start_hz / 1e6,
        meta.stop_hz / 1e6,
        meta.rbw_hz / 1e3,
        meta.window,
        meta.detector,
        meta.average_count
    );
    if let Some(Some(hours)) = archive.elapsed_hours().last() {
        info!("Covers {:.2} hours", hours);
    }
    for skipped in &archive.skipped {
        warn!("Skipped {}", skipped.display());
    }

    if let Some(path) = mean {
        let Some(spectrum) = archive.mean_spectrum() else {
            bail!("no blocks to average");
        };
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "frequency_hz,mean_dbm")?;
        for (f, p) in archive.frequency.iter().zip(spectrum.iter()) {
            writeln!(writer, "{f},{p}")?;
        }
        writer.flush()?;
        info!("Mean spectrum written to {}", path.display());
    }
    Ok(())
}
