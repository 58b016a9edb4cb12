use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use image::imageops::FilterType;
use pixel_sonifier_core::{
    HsvSonifier, PitchStereoSonifier, PixelGrid, Rgb, SoftwareBackend, SonifierConfig,
    SonifierError, ThreadTimer,
};
use tracing_subscriber::EnvFilter;

fn main() -> pixel_sonifier_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Play(args) => run_play(args),
        Commands::Ambient(args) => run_ambient(args),
    }
}

fn run_play(args: PlayArgs) -> pixel_sonifier_core::Result<()> {
    let mut config = args.grid.resolve(SonifierConfig::default())?;
    if let Some(delay) = args.sweep_delay {
        config.sweep.delay_secs = delay;
    }
    if let Some(duration) = args.sweep_duration {
        config.sweep.duration_secs = duration;
    }
    if let Some(count) = args.sweep_count {
        config.sweep.count = count;
    }
    if args.reverse {
        config.sweep.reverse_brightness = true;
    }

    let grid = load_grid(&args.image, config.columns, config.rows)?;
    tracing::info!(image = %args.image.display(), columns = config.columns, rows = config.rows, "playing image");

    let mut sonifier =
        PitchStereoSonifier::new(SoftwareBackend::new(), Box::new(ThreadTimer::new()), &config)?;
    sonifier.set_new_image(Some(&grid), args.detailed)?;
    thread::sleep(Duration::from_secs_f32(args.hold.max(0.0)));
    sonifier.terminate()
}

fn run_ambient(args: AmbientArgs) -> pixel_sonifier_core::Result<()> {
    let config = args.grid.resolve(SonifierConfig::ambient_defaults())?;
    let grid = load_grid(&args.image, config.columns, config.rows)?;
    tracing::info!(image = %args.image.display(), "playing ambient colour tone");

    let mut sonifier = HsvSonifier::new(SoftwareBackend::new(), &config)?;
    sonifier.set_new_image(Some(&grid), false)?;
    thread::sleep(Duration::from_secs_f32(args.hold.max(0.0)));
    sonifier.terminate()
}

/// Decodes an image file and resamples it to the configured grid.
fn load_grid(path: &Path, columns: usize, rows: usize) -> pixel_sonifier_core::Result<PixelGrid> {
    let decoded = image::open(path)
        .map_err(|err| SonifierError::msg(format!("cannot decode {}: {err}", path.display())))?;
    let resized = image::imageops::resize(
        &decoded.to_rgb8(),
        columns as u32,
        rows as u32,
        FilterType::Triangle,
    );
    PixelGrid::from_fn(columns, rows, |x, y| {
        let px = resized.get_pixel(x as u32, y as u32);
        Rgb::new(px[0], px[1], px[2])
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Plays pixel grids as positional audio", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Sonify an image with one pitched voice per row plus a delayed
    /// left-to-right sweep.
    Play(PlayArgs),
    /// Sonify an image's average colour as a continuous ambient tone.
    Ambient(AmbientArgs),
}

#[derive(Args, Debug)]
struct PlayArgs {
    /// Path to the image that should be played.
    image: PathBuf,
    #[command(flatten)]
    grid: GridArgs,
    /// Seconds before the automatic sweep starts.
    #[arg(long)]
    sweep_delay: Option<f32>,
    /// Seconds one left-to-right sweep takes.
    #[arg(long)]
    sweep_duration: Option<f32>,
    /// Number of back-to-back sweep repetitions.
    #[arg(long)]
    sweep_count: Option<usize>,
    /// Treat dark pixels as loud, for light-on-dark content.
    #[arg(long)]
    reverse: bool,
    /// Skip the instantaneous mix and sweep immediately.
    #[arg(long)]
    detailed: bool,
    /// Seconds to keep playing before shutting down.
    #[arg(long, default_value_t = 18.0)]
    hold: f32,
}

#[derive(Args, Debug)]
struct AmbientArgs {
    /// Path to the image that should be played.
    image: PathBuf,
    #[command(flatten)]
    grid: GridArgs,
    /// Seconds to keep playing before shutting down.
    #[arg(long, default_value_t = 6.0)]
    hold: f32,
}

/// Grid and band options shared by both strategies.
#[derive(Args, Debug)]
struct GridArgs {
    /// Optional JSON preset to start from.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    columns: Option<usize>,
    #[arg(long)]
    rows: Option<usize>,
    #[arg(long)]
    low_freq: Option<f32>,
    #[arg(long)]
    high_freq: Option<f32>,
    /// Output device name; defaults to the system default output.
    #[arg(long)]
    device: Option<String>,
}

impl GridArgs {
    /// Loads the preset if given, then applies command line overrides.
    fn resolve(&self, fallback: SonifierConfig) -> pixel_sonifier_core::Result<SonifierConfig> {
        let mut config = match &self.config {
            Some(path) => SonifierConfig::load(path)?,
            None => fallback,
        };
        if let Some(columns) = self.columns {
            config.columns = columns;
        }
        if let Some(rows) = self.rows {
            config.rows = rows;
        }
        if let Some(low_freq) = self.low_freq {
            config.low_freq = low_freq;
        }
        if let Some(high_freq) = self.high_freq {
            config.high_freq = high_freq;
        }
        if let Some(device) = &self.device {
            config.device = device.clone();
        }
        config.validate()?;
        Ok(config)
    }
}
