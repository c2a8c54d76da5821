pub mod api;
pub mod canvas;
pub mod edit;
pub mod gui;
pub mod persistence;
pub mod tree_utils;
