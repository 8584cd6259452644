use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "beatreel", about = "Music-synced slideshow video generator")]
pub struct Cli {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub audio: Option<PathBuf>,

    /// Still images to animate, shown in order
    #[arg(short, long, num_args = 1.., value_delimiter = ',')]
    pub images: Vec<PathBuf>,

    /// Output video file
    #[arg(short, long, default_value = "output.mp4")]
    pub output: PathBuf,

    /// Video width in pixels
    #[arg(long, default_value_t = 1080)]
    pub width: u32,

    /// Video height in pixels
    #[arg(long, default_value_t = 1920)]
    pub height: u32,

    /// Frames per second
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// Video length in seconds (capped by render.max_duration)
    #[arg(short, long, default_value_t = 30.0)]
    pub duration: f32,

    /// Multiplier for every effect (defaults to the preset's value)
    #[arg(long)]
    pub effect_intensity: Option<f32>,

    /// Seconds before each beat during which anticipation effects build
    #[arg(long)]
    pub anticipation: Option<f32>,

    /// Trigger transitions on a fixed beat grid instead of song structure
    #[arg(long)]
    pub no_smart_transitions: bool,

    /// Built-in preset name
    #[arg(short, long, default_value = "standard")]
    pub preset: String,

    /// Custom preset id, takes precedence over --preset
    #[arg(long)]
    pub custom_preset: Option<String>,

    /// Random seed; equal seeds give equal renders
    #[arg(long)]
    pub seed: Option<u64>,

    /// H.264 CRF quality (0-51, lower = better)
    #[arg(long, default_value_t = 20)]
    pub crf: u32,

    /// FFmpeg video codec
    #[arg(long, default_value = "libx264")]
    pub codec: String,

    /// FFmpeg pixel format
    #[arg(long, default_value = "yuv420p")]
    pub pix_fmt: String,

    /// Config file (defaults to beatreel.toml or the user config)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Directory of custom presets
    #[arg(long)]
    pub presets_dir: Option<PathBuf>,

    /// List built-in and custom presets and exit
    #[arg(long)]
    pub list_presets: bool,

    /// Add a preset JSON file to the custom store and exit
    #[arg(long, value_name = "FILE")]
    pub import_preset: Option<PathBuf>,

    /// Print a preset as JSON and exit
    #[arg(long, value_name = "ID")]
    pub export_preset: Option<String>,

    /// Replace a custom preset with the contents of a JSON file and exit
    #[arg(long, num_args = 2, value_names = ["ID", "FILE"])]
    pub update_preset: Option<Vec<String>>,

    /// Remove a custom preset and exit
    #[arg(long, value_name = "ID")]
    pub delete_preset: Option<String>,
}
