//! GhostRender CLI
//!
//! Diagnostic front end: shows the format catalog and what the renderer
//! decides for a given stream, using a recording device in place of a GPU.

use clap::{Parser, Subcommand, ValueEnum};
use ghostrender::{
    format::{lookup, ColorFormat, MediaType},
    processing::ExtendedColorInfo,
    render::{GpuVendor, RecordingDevice, VendorPolicy, VendorRule},
    FrameProcessor, RendererSettings, Resolution, Rotation,
};

/// GPU vendor to emulate
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Vendor {
    #[default]
    Nvidia,
    Amd,
    Intel,
}

impl From<Vendor> for GpuVendor {
    fn from(v: Vendor) -> Self {
        match v {
            Vendor::Nvidia => GpuVendor::Nvidia,
            Vendor::Amd => GpuVendor::Amd,
            Vendor::Intel => GpuVendor::Intel,
        }
    }
}

/// Stream colorimetry preset
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum Colorimetry {
    /// Take whatever the format implies
    #[default]
    Auto,
    Bt709,
    Hdr10,
}

#[derive(Parser)]
#[command(name = "ghostrender")]
#[command(about = "GPU video renderer decision engine")]
#[command(version)]
struct Cli {
    /// Renderer settings file (TOML)
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Debug)]
struct StreamArgs {
    /// Pixel format name (e.g. NV12, P010, YUY2, RGB32)
    #[arg(short, long, default_value = "NV12")]
    format: String,

    /// Frame size (e.g. 1920x1080)
    #[arg(short, long, default_value = "1920x1080")]
    size: Resolution,

    /// Stream colorimetry
    #[arg(long, value_enum, default_value = "auto")]
    color: Colorimetry,

    /// GPU vendor to emulate
    #[arg(long, value_enum, default_value = "nvidia")]
    vendor: Vendor,

    /// Emulate a device without a hardware video processor
    #[arg(long)]
    no_vp: bool,

    /// Emulate an HDR capable display
    #[arg(long)]
    hdr_display: bool,

    /// Drop the built-in vendor workarounds
    #[arg(long)]
    no_vendor_rules: bool,

    /// Keep this format off the emulated vendor's video processor (repeatable)
    #[arg(long, value_name = "FORMAT")]
    avoid_vp: Vec<String>,
}

impl StreamArgs {
    fn vendor_policy(&self, base: VendorPolicy) -> anyhow::Result<VendorPolicy> {
        let mut policy = if self.no_vendor_rules {
            VendorPolicy::empty()
        } else {
            base
        };
        for name in &self.avoid_vp {
            let format = ColorFormat::from_name(name)
                .ok_or_else(|| anyhow::anyhow!("Unknown format: {}", name))?;
            policy = policy.with_rule(VendorRule {
                vendor: self.vendor.into(),
                odd_width: false,
                color_system: None,
                formats: vec![format],
                reason: format!("{} excluded on the command line", format),
            });
        }
        Ok(policy)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List the pixel format catalog
    Formats,

    /// Show strategy, scaling and pass sequence for a stream
    Plan {
        #[command(flatten)]
        stream: StreamArgs,

        /// Window size (defaults to the frame size)
        #[arg(short, long)]
        window: Option<Resolution>,

        /// Clockwise rotation in degrees
        #[arg(short, long, default_value = "0")]
        rotation: i32,
    },

    /// Print the YUV to RGB matrix for a stream
    Matrix {
        #[command(flatten)]
        stream: StreamArgs,
    },
}

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ghostrender=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => RendererSettings::load(path)?,
        None => RendererSettings::default(),
    };

    match cli.command {
        Commands::Formats => cmd_formats(),
        Commands::Plan {
            stream,
            window,
            rotation,
        } => cmd_plan(settings, stream, window, rotation),
        Commands::Matrix { stream } => cmd_matrix(settings, stream),
    }
}

fn cmd_formats() -> anyhow::Result<()> {
    println!("Pixel Formats");
    println!("=============\n");
    println!(
        "  {:<10} {:>6} {:>5} {:<8} {:<10} {}",
        "name", "planes", "bits", "chroma", "system", "video processor"
    );

    for format in ColorFormat::ALL {
        let desc = lookup(format);
        let vp = match desc.vp_format {
            Some(surface) => format!("{:?}", surface),
            None => "-".to_string(),
        };
        println!(
            "  {:<10} {:>6} {:>5} {:<8} {:<10} {}",
            desc.name,
            desc.planes,
            desc.bit_depth,
            format!("{:?}", desc.subsampling),
            format!("{:?}", desc.color_system),
            vp
        );
    }

    Ok(())
}

fn processor_for(
    settings: RendererSettings,
    stream: &StreamArgs,
) -> anyhow::Result<FrameProcessor<RecordingDevice>> {
    let format = ColorFormat::from_name(&stream.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown format: {}", stream.format))?;
    let mut media_type = MediaType::for_format(format, stream.size.width, stream.size.height)
        .ok_or_else(|| anyhow::anyhow!("{} cannot be described by a media type", format))?;
    match stream.color {
        Colorimetry::Auto => {}
        Colorimetry::Bt709 => media_type = media_type.with_color_info(&ExtendedColorInfo::BT709),
        Colorimetry::Hdr10 => media_type = media_type.with_color_info(&ExtendedColorInfo::HDR10),
    }

    let policy = stream.vendor_policy(settings.vendor_policy.clone())?;
    let settings = settings.with_vendor_policy(policy);

    let vendor = GpuVendor::from(stream.vendor);
    let device = if stream.no_vp {
        RecordingDevice::without_video_processor(vendor)
    } else {
        RecordingDevice::new(vendor)
    }
    .with_hdr_output(stream.hdr_display);

    let mut processor = FrameProcessor::new(device, settings);
    processor.configure(media_type)?;
    Ok(processor)
}

fn cmd_plan(
    settings: RendererSettings,
    stream: StreamArgs,
    window: Option<Resolution>,
    rotation: i32,
) -> anyhow::Result<()> {
    let rotation = Rotation::from_degrees(rotation)
        .ok_or_else(|| anyhow::anyhow!("Rotation must be a multiple of 90, got {}", rotation))?;

    let mut processor = processor_for(settings, &stream)?;
    processor.set_window_size(window.unwrap_or(stream.size));
    processor.set_rotation(rotation);
    // a frame forces the dirty scaling decision to be rebuilt
    let frame = vec![0u8; processor_frame_size(&processor)];
    processor.process_frame(&ghostrender::FrameSample::new(frame))?;

    println!("Stream");
    println!("  Format: {}", stream.format);
    println!("  Size: {}", stream.size);
    println!("  Colorimetry: {}", processor.color_info());
    println!();

    println!("Decisions");
    if let Some(kind) = processor.strategy_kind() {
        println!("  Strategy: {}", kind);
    }
    println!("  Internal format: {:?}", processor.internal_format());
    println!("  Swap chain: {}-bit", processor.swap_chain_bits());
    println!("  HDR output: {}", if processor.output_hdr() { "Yes" } else { "No" });
    println!(
        "  Color transform: {}",
        if processor.color_transform().enabled { "enabled" } else { "bypassed" }
    );
    if let Some(decision) = processor.scaling_decision() {
        println!(
            "  Scaling: {} -> {} ({:?} / {:?}, {} pass(es))",
            decision.source,
            decision.destination,
            decision.x,
            decision.y,
            decision.passes.pass_count()
        );
    }

    let plan = processor.correction_plan();
    if !plan.is_empty() {
        println!("\nCorrection steps:");
        for step in &plan.steps {
            println!("  - {:?}", step);
        }
    }

    println!("\nPasses:");
    for (i, stage) in processor.stage_list().stages.iter().enumerate() {
        println!("  {}. {:?} -> {:?} at {}", i + 1, stage.kind, stage.output, stage.size);
    }
    println!("Post-scale steps: {}", processor.post_scale_steps());

    Ok(())
}

fn processor_frame_size(processor: &FrameProcessor<RecordingDevice>) -> usize {
    processor
        .geometry()
        .map(|g| {
            let lines = g.descriptor().buffer_lines(g.height) as usize;
            lines.saturating_mul(g.pitch as usize)
        })
        .unwrap_or(0)
}

fn cmd_matrix(settings: RendererSettings, stream: StreamArgs) -> anyhow::Result<()> {
    let processor = processor_for(settings, &stream)?;
    let transform = processor.color_transform();

    println!("Colorimetry: {}", processor.color_info());
    if !transform.enabled {
        println!("Transform is the identity (bypassed)");
        return Ok(());
    }

    println!("\n  {:>10} {:>10} {:>10} | {:>10}", "Y", "Cb", "Cr", "offset");
    for (row, offset) in transform.m.0.iter().zip(transform.c.iter()) {
        println!(
            "  {:>10.6} {:>10.6} {:>10.6} | {:>10.6}",
            row[0], row[1], row[2], offset
        );
    }

    Ok(())
}
