//! Console application flow
//!
//! Thin presentation glue around the sampling thread: banner, system info,
//! configuration load/prompt/save, a 100 ms display poll while the run is
//! active, and the final report. All measurement happens in `sampler`.

use std::env;
use std::io::{self, Error, ErrorKind};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::time::interval;

use crate::sampler::config::{ClockMode, SamplingConfig, ThreadPriority};
use crate::sampler::priority::{self, ProcessPriorityGuard};
use crate::sampler::{SamplingThread, StopOutcome};
use crate::ui::report;
use crate::utils::helpers::{is_admin, prompt};

const SETTINGS_FILE: &str = "appsettings.json";
const CSV_FILE: &str = "results.csv";
const CHART_FILE: &str = "histogram.png";

/// Cadence at which the display side polls the shared statistics.
const DISPLAY_INTERVAL: Duration = Duration::from_millis(100);

lazy_static::lazy_static! {
    static ref RTC_STATUS: Mutex<Option<String>> = Mutex::new(None);
}

/// Availability of the periodic-interrupt device, probed once and cached.
fn rtc_status() -> String {
    let mut status = RTC_STATUS.lock().unwrap();
    if let Some(ref cached) = *status {
        return cached.clone();
    }
    #[cfg(unix)]
    let value = {
        use crate::sampler::config::DEFAULT_RTC_DEVICE;
        if Path::new(DEFAULT_RTC_DEVICE).exists() {
            format!("{DEFAULT_RTC_DEVICE} present")
        } else {
            format!("{DEFAULT_RTC_DEVICE} not present")
        }
    };
    #[cfg(windows)]
    let value = "not supported on this platform".to_string();

    *status = Some(value.clone());
    value
}

fn print_system_info() -> io::Result<()> {
    println!("{}", "System Information".bold().yellow());
    println!("━━━━━━━━━━━━━━━━━━");
    println!("▸ Working directory: {}", env::current_dir()?.display());

    let os = os_info::get();
    println!("▸ OS: {} {}", os.os_type(), os.version());

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        let cpuid = raw_cpuid::CpuId::new();
        if let Some(brand) = cpuid.get_processor_brand_string() {
            println!("▸ CPU: {}", brand.as_str().trim());
        }
    }

    let mut sys = sysinfo::System::new();
    sys.refresh_cpu_all();
    sys.refresh_memory();
    println!(
        "▸ Cores: {} | Memory: {:.1} GiB",
        sys.cpus().len(),
        sys.total_memory() as f64 / (1024.0 * 1024.0 * 1024.0)
    );
    println!("▸ RTC device: {}", rtc_status());
    println!();
    Ok(())
}

fn parse_clock_mode(value: &str) -> io::Result<ClockMode> {
    match value.to_lowercase().as_str() {
        "timerevent" | "timer" | "1" => Ok(ClockMode::TimerEvent),
        "sleepwait" | "sleep" | "2" => Ok(ClockMode::SleepWait),
        "hardwareinterrupt" | "rtc" | "3" => Ok(ClockMode::HardwareInterrupt),
        other => Err(Error::new(
            ErrorKind::InvalidInput,
            format!("unknown clock mode '{other}'"),
        )),
    }
}

/// Load `appsettings.json` (writing defaults when it does not exist yet),
/// offer interactive overrides, and save the result back.
fn load_and_prompt_config() -> io::Result<SamplingConfig> {
    let path = Path::new(SETTINGS_FILE);
    let mut config = if path.exists() {
        SamplingConfig::load(path)?
    } else {
        let defaults = SamplingConfig::default();
        defaults.save(path)?;
        defaults
    };

    println!("{}", "Benchmark Parameters".bold().yellow());
    println!("━━━━━━━━━━━━━━━━━━━━");

    if let Some(value) = prompt(
        "Clock mode (1=TimerEvent, 2=SleepWait, 3=HardwareInterrupt)",
        &format!("{:?}", config.mode),
    )? {
        config.mode = parse_clock_mode(&value)?;
    }
    if let Some(value) = prompt(
        "Wakeup period in ms (0 = inbound samples only)",
        &config.period_millis.to_string(),
    )? {
        config.period_millis = value
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid period: {e}")))?;
    }
    if let Some(value) = prompt("Run duration in seconds", &config.duration_secs.to_string())? {
        let duration = value
            .parse()
            .map_err(|e| Error::new(ErrorKind::InvalidInput, format!("invalid duration: {e}")))?;
        if duration == 0 {
            return Err(Error::new(ErrorKind::InvalidInput, "duration must be positive"));
        }
        config.duration_secs = duration;
    }
    if let Some(value) = prompt(
        "Send probe datagram after each tick (y/n)",
        if config.send_probe { "y" } else { "n" },
    )? {
        config.send_probe = value.eq_ignore_ascii_case("y");
    }
    if let Some(value) = prompt(
        "Probe destination (ip or ip:port, 'none' to clear)",
        config.destination.as_deref().unwrap_or("none"),
    )? {
        config.destination = if value.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(value)
        };
    }
    println!();

    // Fail early on an address that would only surface inside the thread.
    config.probe_destination()?;

    config.save(path)?;
    Ok(config)
}

/// Run the benchmark: configure, measure, report.
pub async fn run_benchmark() -> io::Result<()> {
    let separator = "=".repeat(60);
    println!("\n{}", separator);
    println!(
        "{:^60}",
        format!("Wakeup Jitter Benchmark v{}", crate::VERSION)
            .bold()
            .cyan()
    );
    println!("{}\n", separator);

    print_system_info()?;

    let config = load_and_prompt_config()?;

    // Real-time elevation needs privilege; refuse up front instead of
    // letting the run abort a few milliseconds in.
    if config.thread_priority == ThreadPriority::TimeCritical && !is_admin() {
        eprintln!(
            "{} {}",
            "❌ Error:".bold().red(),
            "real-time priority requires administrator/root privileges".bold().red()
        );
        eprintln!("   Lower ThreadPriority in appsettings.json to run unprivileged.");
        return Err(Error::new(
            ErrorKind::PermissionDenied,
            "insufficient privilege for real-time priority",
        ));
    }

    if let Err(e) = priority::lock_memory() {
        eprintln!("⚠️  mlockall failed: {e}");
    }
    let process_priority = match ProcessPriorityGuard::apply(config.process_priority) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("⚠️  process priority not applied: {e}");
            None
        }
    };

    println!("{}", "Measurement".bold().yellow());
    println!("━━━━━━━━━━━");
    println!(
        "   Mode: {:?} | Period: {} ms | Duration: {} s | Port: {}",
        config.mode, config.period_millis, config.duration_secs, config.ingest_port
    );
    println!();

    let mut sampler = SamplingThread::new();
    sampler.start(config.clone())?;

    let total_steps = config.duration_secs * 10;
    let pb = ProgressBar::new(total_steps);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {wide_msg}")
            .unwrap()
            .progress_chars("##-"),
    );

    let mut ticker = interval(DISPLAY_INTERVAL);
    ticker.tick().await;
    let mut interrupted = false;
    for _ in 0..total_steps {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                interrupted = true;
            }
        }
        if interrupted || !sampler.is_running() {
            break;
        }
        let snap = sampler.snapshot();
        pb.set_message(format!(
            "avg {:.4} s | max {:.4} s | samples {}",
            snap.running_average_period, snap.max_observed_interval, snap.total_sample_count
        ));
        pb.inc(1);
    }
    let stopped_early = interrupted || !sampler.is_running();
    pb.finish_with_message(if interrupted {
        "interrupted"
    } else {
        "measurement window complete"
    });

    let aborted = sampler.aborted();
    if let StopOutcome::Abandoned = sampler.stop() {
        eprintln!(
            "{}",
            "⚠️  sampling thread did not stop within the grace period and was abandoned"
                .bold()
                .red()
        );
    }
    if aborted && stopped_early && !interrupted {
        eprintln!(
            "{}",
            "⚠️  run aborted before the measurement window elapsed".bold().red()
        );
    }

    let snapshot = sampler.snapshot();
    report::print_report(&snapshot);
    report::write_csv(&snapshot, Path::new(CSV_FILE))?;
    println!("✅ Bucket data written to {CSV_FILE}");
    match report::render_chart(&snapshot, Path::new(CHART_FILE)) {
        Ok(()) => println!("✅ Chart written to {CHART_FILE}"),
        Err(e) => eprintln!("⚠️  chart not rendered: {e}"),
    }

    drop(process_priority);
    Ok(())
}
