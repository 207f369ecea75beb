// src/application/mod.rs
pub mod error;
pub mod services;

pub use services::attachment_reconciler::AttachmentReconciler;
pub use services::field_extractor::FieldExtractor;
pub use services::import_service::ImportService;
pub use services::listing_reconciler::ListingReconciler;
pub use services::resource_governor::ResourceGovernor;
