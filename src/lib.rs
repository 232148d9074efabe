pub mod audio;
pub mod config;
pub mod error;
pub mod render_loop;

pub use config::{load_config, VisualizerConfig};
pub use error::ConfigError;
pub use render_loop::{FramePresenter, RenderLoop, VisualFrame};
