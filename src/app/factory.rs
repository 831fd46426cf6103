use crate::{
    app::service::AppService,
    catalog::{AssetCatalog, CatalogCsv},
    config::Config,
    semantic::{EmbeddingModel, EmbeddingProvider, SearchService, VectorFile},
};
use anyhow::{Context, Result};
use homedir::my_home;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Application factory wiring the components together
pub struct AppFactory;

impl AppFactory {
    /// Load config, catalog and embedding model, and start the index queue.
    pub fn create_app_service(paths: &AppPaths) -> Result<AppService> {
        let config = Self::create_config(&paths.base_path)?;

        let catalog: Arc<dyn AssetCatalog> = Arc::new(
            CatalogCsv::load(&paths.catalog_path).context("Failed to load asset catalog")?,
        );

        let provider: Arc<dyn EmbeddingProvider> = Arc::new(
            EmbeddingModel::new(
                &config.model,
                paths.base_path.clone(),
                Some(config.download_timeout()),
            )
            .context("Failed to load embedding model")?,
        );

        let search = SearchService::new(provider, catalog.clone(), config.search_settings())
            .with_vector_file(VectorFile::new(paths.vectors_path.clone()))
            .context("Failed to load keyword vectors")?;

        Ok(AppService::new(config, catalog, Arc::new(search)))
    }

    /// Get application paths with validation
    pub fn get_paths() -> Result<AppPaths> {
        let base_path = Self::get_base_path()?;

        // Ensure base directory exists
        std::fs::create_dir_all(&base_path)
            .context("Failed to create application base directory")?;

        Ok(AppPaths::new(base_path))
    }

    pub fn create_config(base_path: &Path) -> Result<Config> {
        Config::load_with(base_path).context("Failed to load config.yaml")
    }

    /// Get the base path for the application
    fn get_base_path() -> Result<PathBuf> {
        if let Ok(base_path) = std::env::var("KWSEARCH_BASE_PATH") {
            return Ok(PathBuf::from(base_path));
        }

        let home = my_home()
            .context("Could not determine home directory")?
            .context("Home directory path is empty")?;
        Ok(home.join(".local/share/kwsearch"))
    }
}

/// Application paths structure
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub base_path: PathBuf,
    pub catalog_path: PathBuf,
    pub vectors_path: PathBuf,
}

impl AppPaths {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            catalog_path: base_path.join("catalog"),
            vectors_path: base_path.join("vectors.bin"),
            base_path,
        }
    }
}
