use anyhow::Result;
use canvas_core::assets::AssetSource;
use canvas_core::audio::{DecodePolicy, NullBackend, RodioBackend};
use canvas_core::metrics::MetricsCollector;
use canvas_core::render::{NullTarget, RecordingCanvas, WireTarget};
use canvas_core::time::FixedTimeStep;
use canvas_scripting::runtime::{CanvasRuntime, RuntimeConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, Level};

struct Options {
    script: PathBuf,
    frames: Option<u64>,
    assets_dir: Option<PathBuf>,
    wire: bool,
    no_audio: bool,
    quiet: bool,
}

fn parse_args() -> Options {
    let mut opts = Options {
        script: PathBuf::from("scripts/main.lua"),
        frames: None,
        assets_dir: None,
        wire: false,
        no_audio: false,
        quiet: false,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--frames" => opts.frames = args.next().and_then(|v| v.parse().ok()),
            "--assets" => opts.assets_dir = args.next().map(PathBuf::from),
            "--wire" => opts.wire = true,
            "--no-audio" => opts.no_audio = true,
            "--quiet" => opts.quiet = true,
            other => opts.script = PathBuf::from(other),
        }
    }
    opts
}

fn main() -> Result<()> {
    let opts = parse_args();
    tracing_subscriber::fmt()
        .with_max_level(if opts.quiet { Level::WARN } else { Level::INFO })
        .init();

    info!("luacanvas host starting: {}", opts.script.display());

    let script_root = opts
        .script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let asset_root = opts.assets_dir.clone().unwrap_or_else(|| script_root.clone());

    // Wire mode demonstrates the message-passing renderer: batches are
    // serialized, shipped over a channel and replayed on another thread.
    let (target, wire_thread): (Box<dyn canvas_core::render::RenderTarget>, _) = if opts.wire {
        let (wire, mut receiver) = WireTarget::channel();
        let handle = std::thread::spawn(move || {
            let mut canvas = RecordingCanvas::new();
            let frames = receiver.run(&mut canvas).unwrap_or(0);
            (frames, canvas.calls.len())
        });
        (Box::new(wire), Some(handle))
    } else {
        (Box::new(NullTarget), None)
    };

    let config = RuntimeConfig {
        script_root: script_root.clone(),
        target,
        source: AssetSource::dir(asset_root),
        audio_backend: if opts.no_audio {
            Box::new(NullBackend::new())
        } else {
            Box::new(RodioBackend::new())
        },
        decode_policy: DecodePolicy::Lenient,
        print: Box::new(|msg| println!("{msg}")),
        on_error: Box::new(|msg| eprintln!("script error: {msg}")),
    };
    let runtime = CanvasRuntime::new(config)?;

    runtime.load_script_file(&opts.script)?;

    // A native host has no autoplay gate; unlock audio immediately
    if runtime.notify_interaction() {
        info!("Audio unlocked");
    } else {
        info!("Audio unavailable; continuing silently");
    }

    let mut metrics = MetricsCollector::new();
    let mut timestep = FixedTimeStep::new();
    let mut frame_count: u64 = 0;
    let mut was_active = false;
    let mut mtimes: HashMap<PathBuf, SystemTime> = HashMap::new();
    let mut watch_countdown = 0u32;

    'outer: loop {
        let mut frame_error = None;
        let mut ran = false;
        timestep.update(|dt| {
            if frame_error.is_some() {
                return;
            }
            metrics.begin_frame();
            match runtime.run_frame(dt) {
                Ok(summary) => {
                    metrics.record_flush(summary.commands);
                    if summary.script_error.is_some() {
                        metrics.record_script_error();
                    }
                }
                Err(e) => frame_error = Some(e),
            }
            metrics.end_frame();
            ran = true;
        });
        if let Some(e) = frame_error {
            return Err(e);
        }
        if ran {
            frame_count += 1;
            if let Some(limit) = opts.frames {
                if frame_count >= limit {
                    break 'outer;
                }
            }
            let active = runtime.shared().controller.borrow().is_active();
            if was_active && !active {
                // Script called canvas.stop()
                break 'outer;
            }
            was_active = was_active || active;
        }

        // Watch tracked files roughly once a second
        watch_countdown = watch_countdown.saturating_sub(1);
        if watch_countdown == 0 {
            watch_countdown = 60;
            let mut changed = false;
            for path in runtime.watched_files() {
                if let Ok(modified) = std::fs::metadata(&path).and_then(|m| m.modified()) {
                    match mtimes.get(&path) {
                        Some(prev) if *prev == modified => {}
                        Some(_) => changed = true,
                        None => {}
                    }
                    mtimes.insert(path, modified);
                }
            }
            if changed {
                info!("Script change detected, reloading");
                let report = runtime.reload();
                if report.ok() {
                    metrics.record_reload();
                }
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    runtime.dispose();

    let stats = metrics.get_performance_stats();
    info!(
        "Ran {} frames; mean frame {:.3} ms, p99 {:.3} ms, mean commands {:.1}",
        frame_count,
        stats.get("cpu_frame_mean_ms").copied().unwrap_or(0.0),
        stats.get("cpu_frame_p99_ms").copied().unwrap_or(0.0),
        stats.get("commands_mean").copied().unwrap_or(0.0)
    );

    if let Some(handle) = wire_thread {
        drop(runtime);
        if let Ok((frames, calls)) = handle.join() {
            info!("Wire renderer replayed {} frames ({} calls)", frames, calls);
        }
    }

    Ok(())
}
