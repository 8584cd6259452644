pub mod frame;
pub mod images;
pub mod intensity;
pub mod pipeline;
pub mod transitions;

pub use intensity::SegmentIntensityCurve;
pub use pipeline::{render_music_responsive_video, CancelToken, RenderContext, RenderProgress, RenderRequest};
