// src/util/mod.rs
pub mod helper;
pub mod testing;
