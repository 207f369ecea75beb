// src/domain/repositories/mod.rs
pub mod checkpoint_store;
pub mod content_store;
pub mod media_store;
pub mod taxonomy_store;
