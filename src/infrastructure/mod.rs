// src/infrastructure/mod.rs
pub mod archive;
pub mod di;
pub mod mapping_table;
pub mod repositories;
pub mod xml;
