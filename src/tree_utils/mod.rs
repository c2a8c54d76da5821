pub mod drop_targets;
pub mod layout;
pub mod model;
