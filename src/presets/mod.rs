pub mod embedded;
pub mod model;
pub mod store;

pub use model::Preset;
pub use store::{PresetStore, DEFAULT_PRESET};
