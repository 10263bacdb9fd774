pub mod metadata;

pub use metadata::{load_metadata, update_metadata, MetadataError};
