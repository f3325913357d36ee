//! # Authoring Service Client
//!
//! HTTP implementation of the engine's [`TerminologyServer`] trait.
//!
//! The engine calls the trait synchronously, so each call blocks on the
//! async client through a runtime handle. Call it only from blocking
//! threads (`spawn_blocking`), never from an async task.
//!
//! Endpoints used, relative to the base URL:
//! - `GET branches/{path}`
//! - `GET {branch}/concepts?ecl=&limit=&searchAfter=`
//! - `GET {branch}/export?type=DELTA`
//! - `GET packages/{key}`

use crate::config::RemoteConfig;
use serde::Deserialize;
use std::time::Duration;
use termgraph_core::{BranchMetadata, ConceptId, RemoteError, SearchPage, TerminologyServer};
use tokio::runtime::Handle;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchJson {
    path: String,
    head_timestamp: Option<u64>,
    #[serde(default)]
    metadata: BranchMetadataJson,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BranchMetadataJson {
    previous_package: Option<String>,
    dependency_package: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConceptPageJson {
    #[serde(default)]
    items: Vec<ConceptItemJson>,
    #[serde(default)]
    total: usize,
    search_after: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConceptItemJson {
    concept_id: String,
}

/// Blocking client for the authoring service.
#[derive(Clone)]
pub struct HttpTerminologyServer {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    runtime: Handle,
}

impl std::fmt::Debug for HttpTerminologyServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTerminologyServer")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

impl HttpTerminologyServer {
    /// Build a client from configuration; `None` when no URL is configured.
    pub fn from_config(config: &RemoteConfig, runtime: Handle) -> Result<Option<Self>, RemoteError> {
        let Some(url) = config.url.as_deref() else {
            return Ok(None);
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RemoteError::Transient(e.to_string()))?;
        Ok(Some(Self {
            http,
            base_url: url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            runtime,
        }))
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.get(self.url(path));
        if let Some(ref key) = self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    /// Send, then classify the status: 404 is `NotFound`, 429 and 5xx are
    /// `Transient`, anything else unsuccessful is `Rejected`.
    async fn send(&self, req: reqwest::RequestBuilder, what: &str) -> Result<reqwest::Response, RemoteError> {
        let resp = req
            .send()
            .await
            .map_err(|e| RemoteError::Transient(format!("{}: {}", what, e)))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        let body = resp.text().await.unwrap_or_default();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(RemoteError::Transient(format!("{} ({}): {}", what, status, body)));
        }
        Err(RemoteError::Rejected {
            status: status.as_u16(),
            message: body,
        })
    }

    fn json<T: serde::de::DeserializeOwned>(&self, req: reqwest::RequestBuilder, what: &str) -> Result<T, RemoteError> {
        self.runtime.block_on(async {
            let resp = self.send(req, what).await?;
            resp.json::<T>()
                .await
                .map_err(|e| RemoteError::Transient(format!("{}: invalid body: {}", what, e)))
        })
    }

    fn bytes(&self, req: reqwest::RequestBuilder, what: &str) -> Result<Vec<u8>, RemoteError> {
        self.runtime.block_on(async {
            let resp = self.send(req, what).await?;
            resp.bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| RemoteError::Transient(format!("{}: {}", what, e)))
        })
    }
}

impl TerminologyServer for HttpTerminologyServer {
    fn branch_metadata(&self, branch: &str) -> Result<BranchMetadata, RemoteError> {
        let what = format!("branch {}", branch);
        let json: BranchJson = self.json(self.get(&format!("branches/{}", branch)), &what)?;
        Ok(BranchMetadata {
            path: json.path,
            head_timestamp: json.head_timestamp,
            previous_package: json.metadata.previous_package,
            dependency_package: json.metadata.dependency_package,
        })
    }

    fn search_concepts(
        &self,
        branch: &str,
        ecl: &str,
        search_after: Option<&str>,
        limit: usize,
    ) -> Result<SearchPage, RemoteError> {
        let mut query: Vec<(&str, String)> = vec![("ecl", ecl.to_string()), ("limit", limit.to_string())];
        if let Some(cursor) = search_after {
            query.push(("searchAfter", cursor.to_string()));
        }
        let req = self.get(&format!("{}/concepts", branch)).query(&query);
        let page: ConceptPageJson = self.json(req, &format!("search on {}", branch))?;
        let mut items = Vec::with_capacity(page.items.len());
        for item in page.items {
            let id = item
                .concept_id
                .parse::<ConceptId>()
                .map_err(|e| RemoteError::Transient(format!("bad concept id '{}': {}", item.concept_id, e)))?;
            items.push(id);
        }
        Ok(SearchPage {
            items,
            total: page.total,
            search_after: page.search_after,
        })
    }

    fn export_delta(&self, branch: &str) -> Result<Vec<u8>, RemoteError> {
        let req = self
            .get(&format!("{}/export", branch))
            .query(&[("type", "DELTA")]);
        self.bytes(req, &format!("delta export of {}", branch))
    }

    fn download_package(&self, key: &str) -> Result<Vec<u8>, RemoteError> {
        self.bytes(self.get(&format!("packages/{}", key)), &format!("package {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_url_means_no_client() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .expect("runtime");
        let client = HttpTerminologyServer::from_config(&RemoteConfig::default(), runtime.handle().clone())
            .expect("config");
        assert!(client.is_none());
    }

    #[test]
    fn urls_join_without_double_slashes() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");
        let config = RemoteConfig {
            url: Some("http://authoring.test/api/".into()),
            ..RemoteConfig::default()
        };
        let client = HttpTerminologyServer::from_config(&config, runtime.handle().clone())
            .expect("config")
            .expect("client");
        assert_eq!(client.base_url(), "http://authoring.test/api");
        assert_eq!(client.url("/branches/MAIN"), "http://authoring.test/api/branches/MAIN");
    }

    #[test]
    fn unreachable_service_is_transient() {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .expect("runtime");
        let config = RemoteConfig {
            url: Some("http://127.0.0.1:9".into()),
            timeout_secs: 2,
            ..RemoteConfig::default()
        };
        let client = HttpTerminologyServer::from_config(&config, runtime.handle().clone())
            .expect("config")
            .expect("client");
        assert!(matches!(
            client.branch_metadata("MAIN"),
            Err(RemoteError::Transient(_))
        ));
    }
}
