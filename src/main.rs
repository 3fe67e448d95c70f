//! xcomp-capture - Main entry point
//!
//! Lists windows and drives capture sessions from the command line.

mod args;

use args::{Args, Command};
use clap::Parser;
use log::{debug, error, info, trace, warn};
use std::thread;
use std::time::{Duration, Instant};
use xcomp_capture::capture::{CaptureError, CaptureSession, WindowId, X11Backend};
use xcomp_capture::config::{CaptureConfig, Config};
use xcomp_capture::windows::list_windows;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command line arguments
    let args = Args::parse();

    // Logging is configured from the file, so load it first and report later
    let loaded = args.load_config();
    let mut config = match loaded {
        Ok(ref cfg) => cfg.clone(),
        Err(_) => Config::default(),
    };

    let log_level = if args.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    env_logger::Builder::new()
        .parse_filters(&std::env::var("XCOMP_LOG").unwrap_or(log_level))
        .init();

    debug!("xcomp-capture v{}", env!("CARGO_PKG_VERSION"));
    match loaded {
        Ok(_) => debug!("Loaded configuration from {:?}", args.config),
        Err(e) => warn!("Failed to load config: {}, using defaults", e),
    }

    // Apply command line overrides
    if let Some(ref display) = args.display {
        config.display.name = Some(display.clone());
    }
    if let Command::Capture {
        frames,
        interval_ms,
        reopen_on_resize,
        ..
    } = args.command
    {
        if let Some(frames) = frames {
            config.capture.max_frames = frames;
        }
        if let Some(interval_ms) = interval_ms {
            config.capture.interval_ms = interval_ms;
        }
        if reopen_on_resize {
            config.capture.reopen_on_resize = true;
        }
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let display = config.display.name.as_deref();
    match args.command {
        Command::List { json } => run_list(display, json),
        Command::Info { window } => run_info(display, window),
        Command::Capture { window, .. } => run_capture(display, window, &config.capture),
    }
}

fn run_list(display: Option<&str>, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let backend = X11Backend::connect(display)?;
    let windows = list_windows(&backend)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&windows)?);
    } else if windows.is_empty() {
        println!("No windows found.");
    } else {
        for info in &windows {
            println!("0x{:08x}  {}", info.window, info.title);
        }
    }
    Ok(())
}

fn run_info(display: Option<&str>, window: WindowId) -> Result<(), Box<dyn std::error::Error>> {
    let mut session: CaptureSession<X11Backend> = CaptureSession::new();
    session.open(display, window)?;

    if let (Some(resolved), Some((width, height)), Some(stride), Some(format)) = (
        session.resolved_window(),
        session.dimensions(),
        session.stride(),
        session.pixel_format(),
    ) {
        println!("window:     0x{:x}", window);
        println!("content:    0x{:x}", resolved);
        println!("size:       {}x{}", width, height);
        println!("stride:     {} bytes", stride);
        println!("buffer:     {} bytes", stride * height as usize);
        println!("depth:      {} ({} bits per pixel)", format.depth, format.bits_per_pixel);
        println!("visual:     0x{:x}", format.visual);
        println!(
            "masks:      r=0x{:06x} g=0x{:06x} b=0x{:06x} ({:?})",
            format.red_mask, format.green_mask, format.blue_mask, format.byte_order
        );
    }

    session.close();
    Ok(())
}

fn run_capture(
    display: Option<&str>,
    window: WindowId,
    config: &CaptureConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut session: CaptureSession<X11Backend> = CaptureSession::new();
    session.open(display, window)?;

    let interval = Duration::from_millis(config.interval_ms);
    let mut last_digest = None;
    let mut frames = 0u64;

    loop {
        let started = Instant::now();

        match session.refresh() {
            Ok(()) => {
                frames += 1;
                if let Some(frame) = session.buffer() {
                    let digest = frame.digest();
                    if last_digest != Some(digest) {
                        info!("Frame {}: {} changed (digest {:016x})", frames, frame, digest);
                        last_digest = Some(digest);
                    } else {
                        trace!("Frame {}: unchanged", frames);
                    }
                }
            }
            Err(CaptureError::GeometryMismatch { expected, actual }) if config.reopen_on_resize => {
                info!(
                    "Window resized from {}x{} to {}x{}, reopening capture",
                    expected.0, expected.1, actual.0, actual.1
                );
                session.close();
                session.open(display, window)?;
                last_digest = None;
                continue;
            }
            Err(e) => {
                error!("Refresh failed after {} frames: {}", frames, e);
                session.close();
                return Err(e.into());
            }
        }

        if config.max_frames > 0 && frames >= config.max_frames {
            break;
        }

        let elapsed = started.elapsed();
        if elapsed < interval {
            thread::sleep(interval - elapsed);
        }
    }

    if let Some(stats) = session.stats() {
        info!(
            "Captured {} frames, average refresh {} us, {} failed",
            stats.total_refreshes,
            stats.average_refresh_time_us(),
            stats.failed_refreshes
        );
    }
    session.close();
    Ok(())
}
