use crate::{
    catalog::{AssetCatalog, AssetCreate, AssetFile, AssetType, FrameCreate, FrameKeywords},
    config::Config,
    indexer::{IndexQueue, IndexTicket, QueueDump, Task},
    semantic::{IndexStats, SearchContext, SearchResult, SearchService, SimilarKeyword},
};
use anyhow::Result;
use std::sync::Arc;

/// Keywords attached by an ingestion call and the task embedding them.
pub struct Ingested<T> {
    pub record: T,
    pub added: Vec<String>,
    /// `None` when nothing new needed indexing
    pub ticket: Option<IndexTicket>,
}

pub struct AppService {
    config: Config,
    catalog: Arc<dyn AssetCatalog>,
    search: Arc<SearchService>,
    queue: IndexQueue,
}

impl AppService {
    pub fn new(config: Config, catalog: Arc<dyn AssetCatalog>, search: Arc<SearchService>) -> Self {
        let queue = IndexQueue::start(search.clone());
        Self {
            config,
            catalog,
            search,
            queue,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn search_service(&self) -> Arc<SearchService> {
        self.search.clone()
    }

    pub fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_similarity: Option<f32>,
        asset_type: Option<AssetType>,
    ) -> Result<Vec<SearchResult>> {
        self.search_with_context(query, top_k, min_similarity, asset_type, &self.search.context())
    }

    pub fn search_with_context(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_similarity: Option<f32>,
        asset_type: Option<AssetType>,
        ctx: &SearchContext,
    ) -> Result<Vec<SearchResult>> {
        let settings = self.search.settings();
        Ok(self.search.semantic_search_with_context(
            query,
            top_k.unwrap_or(settings.default_top_k),
            min_similarity.unwrap_or(settings.default_min_similarity),
            asset_type,
            ctx,
        )?)
    }

    pub fn similar_keywords(
        &self,
        query: &str,
        top_k: Option<usize>,
        min_similarity: Option<f32>,
    ) -> Result<Vec<SimilarKeyword>> {
        let settings = self.search.settings();
        Ok(self.search.find_similar_keywords(
            query,
            top_k.unwrap_or(settings.default_top_k),
            min_similarity.unwrap_or(settings.default_min_similarity),
        )?)
    }

    /// Queue a full index pass.
    pub fn submit_index_all(&self) -> Result<IndexTicket> {
        self.queue.submit(Task::IndexAll)
    }

    pub fn stats(&self) -> Result<IndexStats> {
        Ok(self.search.stats()?)
    }

    pub fn index_queue(&self) -> QueueDump {
        self.queue.dump()
    }

    pub fn add_file(&self, create: AssetCreate) -> Result<AssetFile> {
        let file = self.catalog.create_file(create)?;
        log::info!("added {} file {} ({})", file.asset_type, file.id, file.name);
        Ok(file)
    }

    /// Attach keywords to a file and queue the new ones for embedding.
    ///
    /// They are visible to exact matching on return and to semantic
    /// matching once the ticket completes.
    pub fn tag_file(&self, file_id: u64, keywords: &[String]) -> Result<Ingested<u64>> {
        let added = self.catalog.add_file_keywords(file_id, keywords)?;
        let ticket = self.queue_keywords(Some(file_id), &added)?;
        Ok(Ingested {
            record: file_id,
            added,
            ticket,
        })
    }

    pub fn add_frame(&self, file_id: u64, frame: FrameCreate) -> Result<Ingested<FrameKeywords>> {
        let frame = self.catalog.add_frame_keywords(file_id, frame)?;
        let added = frame.tokens.clone();
        let ticket = self.queue_keywords(Some(file_id), &added)?;
        Ok(Ingested {
            record: frame,
            added,
            ticket,
        })
    }

    pub fn shutdown(&self) {
        self.queue.shutdown();
    }

    fn queue_keywords(&self, file_id: Option<u64>, keywords: &[String]) -> Result<Option<IndexTicket>> {
        if keywords.is_empty() {
            return Ok(None);
        }

        let ticket = self.queue.submit(Task::IndexKeywords {
            file_id,
            keywords: keywords.to_vec(),
        })?;
        log::debug!("queued {} keywords as task {}", keywords.len(), ticket.id);
        Ok(Some(ticket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogCsv;
    use crate::semantic::SearchSettings;
    use crate::tests::FakeProvider;
    use std::time::Duration;

    fn app() -> (AppService, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let catalog: Arc<dyn AssetCatalog> = Arc::new(CatalogCsv::load(dir.path()).unwrap());
        let search = Arc::new(SearchService::new(
            Arc::new(FakeProvider::new(8)),
            catalog.clone(),
            SearchSettings::default(),
        ));
        (AppService::new(Config::default(), catalog, search), dir)
    }

    #[test]
    fn test_tagging_is_searchable_then_indexed() {
        let (app, _dir) = app();
        let file = app
            .add_file(AssetCreate {
                name: "trip.txt".into(),
                path: "/data/trip.txt".into(),
                asset_type: Some(AssetType::Text),
                ..Default::default()
            })
            .unwrap();

        let ingested = app
            .tag_file(file.id, &["river".to_string(), "lake".to_string()])
            .unwrap();
        assert_eq!(ingested.added, vec!["river", "lake"]);

        // exact matching does not wait for indexing
        let results = app.search("river", None, None, None).unwrap();
        assert_eq!(results.len(), 1);

        let indexed = ingested
            .ticket
            .unwrap()
            .wait_timeout(Duration::from_secs(5))
            .unwrap();
        assert_eq!(indexed, 2);
        assert_eq!(app.stats().unwrap().indexed_keywords, 2);

        app.shutdown();
    }

    #[test]
    fn test_retagging_queues_nothing() {
        let (app, _dir) = app();
        let file = app
            .add_file(AssetCreate {
                name: "a".into(),
                path: "a".into(),
                ..Default::default()
            })
            .unwrap();

        app.tag_file(file.id, &["lake".to_string()]).unwrap();
        let again = app.tag_file(file.id, &["lake".to_string()]).unwrap();
        assert!(again.added.is_empty());
        assert!(again.ticket.is_none());

        app.shutdown();
    }

    #[test]
    fn test_add_frame_queues_tokens() {
        let (app, _dir) = app();
        let video = app
            .add_file(AssetCreate {
                name: "clip.mp4".into(),
                path: "/data/clip.mp4".into(),
                asset_type: Some(AssetType::Video),
                ..Default::default()
            })
            .unwrap();

        let ingested = app
            .add_frame(
                video.id,
                FrameCreate {
                    frame_index: 3,
                    timestamp: Some(12.5),
                    confidence: None,
                    keywords: vec!["dog".into(), "park".into(), "sunny".into()],
                },
            )
            .unwrap();
        assert_eq!(ingested.record.field, "dog, park, sunny");

        ingested.ticket.unwrap().wait().unwrap();
        let queue = app.index_queue();
        assert_eq!(queue.queue.len(), 1);

        app.shutdown();
    }
}
