pub mod analysis;
pub mod decode;
pub mod extract;
pub mod features;
pub mod structure;

pub use analysis::{Importance, MusicAnalysis, MusicAnalyzer, TransitionPoint};
pub use extract::{FeatureExtractor, SymphoniaExtractor};
pub use features::{AudioFeatures, FeatureKind, Groove};
