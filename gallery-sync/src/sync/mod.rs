pub mod catalog;
pub mod keys;
pub mod local_previews;
pub mod metadata;
pub mod metadata_source;
pub mod orchestrator;
mod persist;
pub mod pool;
pub mod preview;
pub mod remote;
pub mod scanner;
pub mod state;
pub mod summary;

pub use persist::StoreError;
