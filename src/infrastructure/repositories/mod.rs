// src/infrastructure/repositories/mod.rs
pub mod filesystem_media_store;
pub mod json_checkpoint_store;
pub mod json_content_store;

pub use filesystem_media_store::FilesystemMediaStore;
pub use json_checkpoint_store::JsonCheckpointStore;
pub use json_content_store::JsonContentStore;
