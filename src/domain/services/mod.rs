// src/domain/services/mod.rs
pub mod clock;
pub mod path_resolver;
pub mod transforms;
