pub mod editor;
pub mod interaction;
pub mod scene;
pub mod selection;
pub mod viewport;

pub use editor::{ActiveView, NodeMeasurer, TreeEditor};
pub use selection::Selection;
