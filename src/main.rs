//! Deinterlace CLI: runs image sequences through the temporal deinterlace filter.

mod config_utils;

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use config_utils::{apply_overrides, collect_frames, load_settings, ConfigWatcher};
use deinterlace::filter::{
    DeinterlaceDefinition, FilterHost, FilterRegistry, FilterRuntime, DEINTERLACE_FILTER_ID,
};
use deinterlace::frame::VideoFrame;
use deinterlace::host::OffscreenHost;
use deinterlace::output::{ImageSequenceOutput, OutputBackend};
use deinterlace::settings::Technique;
use deinterlace::shader::{GpuContext, ShaderSource};
use deinterlace::utils::FpsCounter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{error, info};

/// Which field of an interlaced frame was captured first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FieldOrder {
    /// Even lines come first
    Top,
    /// Odd lines come first
    Bottom,
}

impl FieldOrder {
    fn top_field_first(self) -> bool {
        self == FieldOrder::Top
    }
}

/// Temporal deinterlacer for image sequences.
#[derive(Parser, Debug)]
#[command(name = "deinterlace")]
#[command(about = "Deinterlace image sequences on the GPU")]
struct Args {
    /// Input frames or directories of frames, processed in order
    #[arg(short, long, num_args = 1.., required_unless_present = "list_techniques")]
    input: Vec<PathBuf>,

    /// Directory the deinterlaced frames are written to
    #[arg(short, long, default_value = "deinterlaced")]
    output: PathBuf,

    /// YAML file with filter settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Deinterlacing technique (overrides the config file)
    #[arg(short, long)]
    deinterlacer: Option<String>,

    /// Field order (overrides the config file)
    #[arg(long, value_enum)]
    field_order: Option<FieldOrder>,

    /// Path to a WGSL effect replacing the bundled one
    #[arg(short, long)]
    shader: Option<PathBuf>,

    /// Re-run the sequence whenever the config file changes
    #[arg(short, long, requires = "config")]
    watch: bool,

    /// List available techniques and exit
    #[arg(long)]
    list_techniques: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if args.list_techniques {
        println!("Available techniques:");
        for technique in Technique::ALL {
            println!("  {:<16} {}", technique.name(), technique.label());
        }
        return Ok(());
    }

    let source = match &args.shader {
        Some(path) => {
            info!("Loading effect from {:?}", path);
            ShaderSource::load(path)?
        }
        None => ShaderSource::builtin(),
    };

    let mut registry = FilterRegistry::<OffscreenHost>::new();
    registry.register(DeinterlaceDefinition::new(source));

    let mut settings = load_settings(args.config.as_deref())?;
    apply_overrides(
        &mut settings,
        args.deinterlacer.as_deref(),
        args.field_order.map(FieldOrder::top_field_first),
    );

    let frames = collect_frames(&args.input)?;
    if frames.is_empty() {
        return Err(anyhow!("No input frames found"));
    }

    let gpu = GpuContext::new()?;
    let mut host = OffscreenHost::new(gpu);
    let mut filter = registry.create(
        DEINTERLACE_FILTER_ID,
        &settings,
        host.filter_node(),
        host.graphics(),
    )?;
    info!("Filter attached to {:?}", host.filter_node());

    let mut output = ImageSequenceOutput::new(&args.output)?;
    let result = run_sequence(&mut host, filter.as_mut(), &frames, &mut output);

    if args.watch && result.is_ok() {
        watch_config(&args, &registry, &mut host, &mut filter, &frames, &mut output)?;
    }

    filter.detach();
    result
}

/// Processes every frame in order and writes the results.
fn run_sequence(
    host: &mut OffscreenHost,
    filter: &mut dyn FilterRuntime<OffscreenHost>,
    frames: &[PathBuf],
    output: &mut dyn OutputBackend,
) -> Result<()> {
    let mut fps = FpsCounter::new();
    for path in frames {
        let frame = VideoFrame::load(path)?;
        let processed = host.process(filter, &frame)?;
        output.write_frame(&processed)?;

        if let Some(rate) = fps.update() {
            info!("Deinterlacing at {:.2} FPS", rate);
        }
    }
    info!(
        "Processed {} frames ({:.2} FPS average)",
        fps.total_frames(),
        fps.average()
    );
    Ok(())
}

/// Re-runs the sequence with a fresh filter on every config change until interrupted.
fn watch_config(
    args: &Args,
    registry: &FilterRegistry<OffscreenHost>,
    host: &mut OffscreenHost,
    filter: &mut Box<dyn FilterRuntime<OffscreenHost>>,
    frames: &[PathBuf],
    output: &mut ImageSequenceOutput,
) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received interrupt signal, shutting down...");
        r.store(false, Ordering::SeqCst);
    })?;

    let Some(mut watcher) = ConfigWatcher::new(args.config.clone()) else {
        return Err(anyhow!("Cannot watch {:?}", args.config));
    };

    while running.load(Ordering::SeqCst) {
        if let Some(mut settings) = watcher.check_for_changes() {
            apply_overrides(
                &mut settings,
                args.deinterlacer.as_deref(),
                args.field_order.map(FieldOrder::top_field_first),
            );
            // Each pass starts from the first frame, so no history may carry over.
            if let Err(e) = registry.recreate(
                DEINTERLACE_FILTER_ID,
                filter,
                &settings,
                host.filter_node(),
                host.graphics(),
            ) {
                error!("Failed to recreate filter: {}", e);
                continue;
            }

            output.rewind();
            if let Err(e) = run_sequence(host, filter.as_mut(), frames, output) {
                error!("Processing failed: {:#}", e);
            }
        }
        thread::sleep(Duration::from_millis(100));
    }
    Ok(())
}
