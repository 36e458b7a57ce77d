//! Bulk fetch of search job summaries.
//!
//! The job listing is owned by another service; this module only consumes
//! it. It is the source of truth for which jobs exist and for the state of
//! any job whose stream updates were missed.

use async_trait::async_trait;
use searchcast_core::SearchJob;
use serde::Deserialize;

use crate::error::ClientError;

/// Which page of the job listing to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 25,
        }
    }
}

/// One page of job summaries.
///
/// Jobs missing `status`/`step` decode as pending.
#[derive(Debug, Clone, Deserialize)]
pub struct JobPage {
    pub data: Vec<SearchJob>,
    #[serde(default)]
    pub total: Option<u64>,
}

/// Anything that can produce a page of jobs.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_page(&self, page: PageRequest) -> Result<JobPage, ClientError>;
}

/// [`JobSource`] backed by an HTTP listing endpoint.
///
/// Sends `GET {url}?page=N&perPage=M` and expects `{"data": [...]}`.
pub struct HttpJobSource {
    client: reqwest::Client,
    url: String,
}

impl HttpJobSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    /// Reuse an existing [`reqwest::Client`] (shares its connection pool).
    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl JobSource for HttpJobSource {
    async fn fetch_page(&self, page: PageRequest) -> Result<JobPage, ClientError> {
        let response = self
            .client
            .get(&self.url)
            .query(&[("page", page.page), ("perPage", page.per_page)])
            .send()
            .await?;

        let response = ClientError::ensure_success(response).await?;
        Ok(response.json::<JobPage>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use searchcast_core::SearchStatus;

    #[test]
    fn page_decodes_with_pending_defaults() {
        let page: JobPage = serde_json::from_str(
            r#"{"data":[
                {"id":"s1","requesterId":"u1","params":{"q":"rust"}},
                {"id":"s2","status":"active","step":"scraping"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(page.total, None);
        assert_eq!(page.data[0].status, SearchStatus::Pending);
        assert_eq!(page.data[0].step, "pending");
        assert_eq!(page.data[0].requester_id.as_deref(), Some("u1"));
        assert_eq!(page.data[1].status, SearchStatus::Active);
    }
}
