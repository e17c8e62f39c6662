pub mod brave;
pub mod duckduckgo;

use async_trait::async_trait;

use crate::core::types::SearchLink;
use crate::net::HttpClient;

/// The two scraped SERP backends behind one seam so the orchestrator can be
/// exercised with scripted engines.
#[async_trait]
pub trait SearchService: Send + Sync {
    async fn search_brave(
        &self,
        query: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<SearchLink>>;

    async fn search_duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<SearchLink>>;
}

pub struct ScrapedSearchService {
    http: HttpClient,
}

impl ScrapedSearchService {
    pub fn new(http: HttpClient) -> Self {
        ScrapedSearchService { http }
    }
}

#[async_trait]
impl SearchService for ScrapedSearchService {
    async fn search_brave(
        &self,
        query: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<SearchLink>> {
        brave::search(&self.http, query, max_results).await
    }

    async fn search_duckduckgo(
        &self,
        query: &str,
        max_results: usize,
    ) -> anyhow::Result<Vec<SearchLink>> {
        duckduckgo::search(&self.http, query, max_results).await
    }
}
