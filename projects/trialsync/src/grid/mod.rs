// Grid compositor: decodes several videos concurrently and tiles them
// frame by frame onto one canvas, for display or for encoding.

pub mod compositor;
pub mod layout;
pub mod pacer;
pub mod player;
pub mod worker;

pub use compositor::CompositorConfig;
pub use player::{HighguiWindow, VideoGrid};
