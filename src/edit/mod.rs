pub mod error;
pub mod sequence;
pub mod translate;

pub use error::EditError;
pub use sequence::{CallSequence, SequenceStep};
pub use translate::{EditKind, EditPlan};
