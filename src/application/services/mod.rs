// src/application/services/mod.rs
pub mod attachment_reconciler;
pub mod field_extractor;
pub mod import_service;
pub mod listing_reconciler;
pub mod resource_governor;
