use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub presets: PresetsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_crf")]
    pub crf: u32,
    #[serde(default = "default_codec")]
    pub codec: String,
    #[serde(default = "default_pix_fmt")]
    pub pix_fmt: String,
}

/// Knobs of the render loop that are not part of a preset.
#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    /// Hard cap on the rendered duration in seconds.
    #[serde(default = "default_max_duration")]
    pub max_duration: f32,
    #[serde(default = "default_transition_duration")]
    pub transition_duration: f32,
    /// Minimum spacing between the starts of two transitions.
    #[serde(default = "default_min_transition_interval")]
    pub min_transition_interval: f32,
    /// Seed of the per-job random generator. Equal seeds give equal renders.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_smart_transitions")]
    pub smart_transitions: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,
    #[serde(default = "default_hop_size")]
    pub hop_size: usize,
    /// Audio shorter than this (seconds) is treated as degenerate.
    #[serde(default = "default_min_duration")]
    pub min_duration: f32,
    /// Peak windowed RMS below this is treated as silence.
    #[serde(default = "default_silence_rms")]
    pub silence_rms: f32,
    #[serde(default)]
    pub drops: DropDetectionConfig,
}

/// Peak-picking constants of the drop detector, in energy-curve samples.
#[derive(Debug, Clone, Deserialize)]
pub struct DropDetectionConfig {
    #[serde(default = "default_gaussian_sigma")]
    pub gaussian_sigma: f32,
    #[serde(default = "default_pre_max")]
    pub pre_max: usize,
    #[serde(default = "default_post_max")]
    pub post_max: usize,
    #[serde(default = "default_pre_avg")]
    pub pre_avg: usize,
    #[serde(default = "default_post_avg")]
    pub post_avg: usize,
    #[serde(default = "default_delta")]
    pub delta: f32,
    #[serde(default = "default_wait")]
    pub wait: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PresetsConfig {
    /// Directory holding custom preset JSON files.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            crf: default_crf(),
            codec: default_codec(),
            pix_fmt: default_pix_fmt(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_duration: default_max_duration(),
            transition_duration: default_transition_duration(),
            min_transition_interval: default_min_transition_interval(),
            seed: default_seed(),
            smart_transitions: default_smart_transitions(),
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            fft_size: default_fft_size(),
            hop_size: default_hop_size(),
            min_duration: default_min_duration(),
            silence_rms: default_silence_rms(),
            drops: DropDetectionConfig::default(),
        }
    }
}

impl Default for DropDetectionConfig {
    fn default() -> Self {
        Self {
            gaussian_sigma: default_gaussian_sigma(),
            pre_max: default_pre_max(),
            post_max: default_post_max(),
            pre_avg: default_pre_avg(),
            post_avg: default_post_avg(),
            delta: default_delta(),
            wait: default_wait(),
        }
    }
}

fn default_width() -> u32 { 1080 }
fn default_height() -> u32 { 1920 }
fn default_fps() -> u32 { 30 }
fn default_crf() -> u32 { 20 }
fn default_codec() -> String { "libx264".into() }
fn default_pix_fmt() -> String { "yuv420p".into() }
fn default_max_duration() -> f32 { 300.0 }
fn default_transition_duration() -> f32 { 0.5 }
fn default_min_transition_interval() -> f32 { 2.0 }
fn default_seed() -> u64 { 42 }
fn default_smart_transitions() -> bool { true }
fn default_fft_size() -> usize { 2048 }
fn default_hop_size() -> usize { 512 }
fn default_min_duration() -> f32 { 1.0 }
fn default_silence_rms() -> f32 { 1e-4 }
fn default_gaussian_sigma() -> f32 { 5.0 }
fn default_pre_max() -> usize { 20 }
fn default_post_max() -> usize { 20 }
fn default_pre_avg() -> usize { 60 }
fn default_post_avg() -> usize { 60 }
fn default_delta() -> f32 { 0.01 }
fn default_wait() -> usize { 100 }

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(err) => {
            log::warn!("Invalid config {}: {}", path.display(), err);
            None
        }
    }
}

/// Look for `beatreel.toml` in the working directory, then the per-user config.
pub fn discover_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("beatreel.toml");
    if local.exists() {
        return Some(local);
    }
    if let Some(home) = dirs::home_dir() {
        let xdg = home.join(".config").join("beatreel").join("config.toml");
        if xdg.exists() {
            return Some(xdg);
        }
    }
    if let Some(config_dir) = dirs::config_dir() {
        let platform = config_dir.join("beatreel").join("config.toml");
        if platform.exists() {
            return Some(platform);
        }
    }
    None
}

/// Default location of the custom preset store.
pub fn default_presets_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("beatreel").join("presets"))
}
