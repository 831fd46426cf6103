use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::{
    SearchSettings, DEFAULT_MIN_SIMILARITY, DEFAULT_MODEL, DEFAULT_TOP_K, MAX_TOP_K,
};
use crate::storage::{self, StorageManager};

const CONFIG_FILE: &str = "config.yaml";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SEARCH_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_INDEX_BATCH_SIZE: usize = 64;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    /// Inclusive similarity threshold [0.0, 1.0]
    #[serde(default = "default_min_similarity")]
    pub default_min_similarity: f32,

    /// Seconds allowed for downloading and loading the embedding model
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    /// Deadline for a single search; 0 disables it
    #[serde(default = "default_search_timeout_ms")]
    pub search_timeout_ms: u64,

    /// Keywords sent to the embedding model per call while indexing
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,

    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            default_top_k: default_top_k(),
            default_min_similarity: default_min_similarity(),
            download_timeout_secs: default_download_timeout_secs(),
            search_timeout_ms: default_search_timeout_ms(),
            index_batch_size: default_index_batch_size(),
            listen_addr: default_listen_addr(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_min_similarity() -> f32 {
    DEFAULT_MIN_SIMILARITY
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_search_timeout_ms() -> u64 {
    DEFAULT_SEARCH_TIMEOUT_MS
}

fn default_index_batch_size() -> usize {
    DEFAULT_INDEX_BATCH_SIZE
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }

        if !(1..=MAX_TOP_K).contains(&self.default_top_k) {
            bail!(
                "default_top_k must be between 1 and {MAX_TOP_K}, got {}",
                self.default_top_k
            );
        }

        if !(0.0..=1.0).contains(&self.default_min_similarity) {
            bail!(
                "default_min_similarity must be between 0.0 and 1.0, got {}",
                self.default_min_similarity
            );
        }

        if self.download_timeout_secs == 0 {
            bail!("download_timeout_secs must be greater than 0");
        }

        if self.index_batch_size == 0 {
            bail!("index_batch_size must be greater than 0");
        }

        if self.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }

        Ok(())
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let store = storage::BackendLocal::new(base_path)
            .with_context(|| format!("failed to create {base_path:?}"))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            log::info!("writing default config to {:?}", base_path.join(CONFIG_FILE));
            store.write(CONFIG_FILE, serde_yml::to_string(&Self::default())?.as_bytes())?;
        }

        let config_str =
            String::from_utf8(store.read(CONFIG_FILE)?).context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = storage::BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store.write(CONFIG_FILE, config_str.as_bytes())?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            default_top_k: self.default_top_k,
            default_min_similarity: self.default_min_similarity,
            search_timeout: Duration::from_millis(self.search_timeout_ms),
            index_batch_size: self.index_batch_size,
        }
    }
}
