// src/infrastructure/di/service_container.rs
use std::path::Path;
use std::sync::Arc;

use crate::application::error::{ApplicationError, ApplicationResult};
use crate::application::services::field_extractor::FieldExtractor;
use crate::application::services::import_service::ImportService;
use crate::application::services::listing_reconciler::ListingReconciler;
use crate::config::Settings;
use crate::domain::repositories::checkpoint_store::CheckpointStore;
use crate::domain::repositories::content_store::ContentStore;
use crate::domain::repositories::media_store::MediaStore;
use crate::domain::repositories::taxonomy_store::TaxonomyStore;
use crate::domain::services::clock::{Clock, SystemClock};
use crate::domain::services::transforms::{TransformContext, ValueFilter};
use crate::infrastructure::mapping_table::MappingTable;
use crate::infrastructure::repositories::{
    FilesystemMediaStore, JsonCheckpointStore, JsonContentStore,
};

/// Production service container - single source of truth for service creation
pub struct ServiceContainer {
    pub content_store: Arc<dyn ContentStore>,
    pub taxonomy_store: Arc<dyn TaxonomyStore>,
    pub media_store: Arc<dyn MediaStore>,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub clock: Arc<dyn Clock>,
    pub import_service: Arc<ImportService>,
}

impl ServiceContainer {
    /// Create all services with explicit dependency injection
    pub fn new(config: &Settings) -> ApplicationResult<Self> {
        // Base infrastructure
        let content = Arc::new(
            JsonContentStore::new(Path::new(&config.state_dir).join("content.json"))
                .map_err(|e| ApplicationError::Domain(e.context("content store")))?,
        );
        let content_store: Arc<dyn ContentStore> = content.clone();
        let taxonomy_store: Arc<dyn TaxonomyStore> = content;
        let media_store: Arc<dyn MediaStore> = Arc::new(
            FilesystemMediaStore::new(&config.media_dir)
                .map_err(|e| ApplicationError::Domain(e.context("media store")))?,
        );
        let checkpoint_store: Arc<dyn CheckpointStore> = Arc::new(
            JsonCheckpointStore::new(&config.state_dir)
                .map_err(|e| ApplicationError::Domain(e.context("checkpoint store")))?,
        );
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let mapping_table = Self::load_mapping_table(config)?;

        // Application services with explicit DI
        let field_extractor = FieldExtractor::new(
            taxonomy_store.clone(),
            ValueFilter::new(
                config.value_filter.enabled,
                config.value_filter.exempt_sources.clone(),
            ),
        );
        let reconciler = ListingReconciler::new(
            content_store.clone(),
            media_store.clone(),
            field_extractor,
            config.languages.clone(),
            config.force_review_status,
        );
        let import_service = Arc::new(ImportService::new(
            checkpoint_store.clone(),
            clock.clone(),
            reconciler,
            mapping_table,
            config.clone(),
        ));

        Ok(Self {
            content_store,
            taxonomy_store,
            media_store,
            checkpoint_store,
            clock,
            import_service,
        })
    }

    fn load_mapping_table(config: &Settings) -> ApplicationResult<MappingTable> {
        let context = TransformContext {
            default_currency: config.feed.default_currency.clone(),
            area_unit: config.feed.area_unit.clone(),
            code_tables: config.code_tables.clone(),
        };
        let path = Path::new(&config.mapping_table);
        if !path.exists() {
            return Err(ApplicationError::Validation(format!(
                "mapping table not found: {} (set mapping_table in the config or ESTATESYNC_MAPPING_TABLE)",
                path.display()
            )));
        }
        MappingTable::load(path, &context)
            .map_err(|e| ApplicationError::Domain(e.context("mapping table")))
    }
}

impl std::fmt::Debug for ServiceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContainer")
            .field("content_store", &"Arc<dyn ContentStore>")
            .field("taxonomy_store", &"Arc<dyn TaxonomyStore>")
            .field("media_store", &"Arc<dyn MediaStore>")
            .field("checkpoint_store", &"Arc<dyn CheckpointStore>")
            .field("clock", &"Arc<dyn Clock>")
            .field("import_service", &"Arc<ImportService>")
            .finish()
    }
}
