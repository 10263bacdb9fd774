pub mod catalog;
pub mod preview;
