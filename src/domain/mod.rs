// src/domain/mod.rs
pub mod attachment;
pub mod checkpoint;
pub mod document;
pub mod error;
pub mod feed;
pub mod listing;
pub mod mapping;
pub mod path_expr;
pub mod repositories;
pub mod services;
