//! Music-responsive slideshow rendering: analyze a track, then animate still
//! images with beat-synced effects and structure-aware transitions.

pub mod audio;
pub mod config;
pub mod effects;
pub mod encode;
pub mod error;
pub mod presets;
pub mod render;

pub use error::{EffectError, PresetError, RenderError};
pub use presets::{Preset, PresetStore};
pub use render::{render_music_responsive_video, CancelToken, RenderContext, RenderProgress, RenderRequest};
