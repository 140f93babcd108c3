//! Entity source client
//!
//! Fetches one entity collection from the upstream API. Before the
//! first fetch for an entity an availability probe must succeed: the
//! collection endpoint is polled at a fixed interval up to a bounded
//! attempt count, and exhaustion aborts the entity pipeline with no
//! side effects.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::entity::EntityKind;
use crate::{IngestError, Result};

/// Ordered records returned by one fetch; insertion order is the API
/// response order. May be empty.
pub type Batch = Vec<Value>;

/// Upstream source of entity collections.
#[async_trait]
pub trait Source: Send + Sync {
    /// Block until the collection endpoint answers healthy, or fail
    /// with `SourceUnavailable` once the probe budget is exhausted.
    async fn probe(&self, kind: EntityKind) -> Result<()>;

    /// Fetch the full collection for `kind`. Fails with `Source` on a
    /// non-success status or a malformed body.
    async fn fetch(&self, kind: EntityKind) -> Result<Batch>;
}

/// HTTP client for the upstream activity API
///
/// Expects `GET {base}/{plural}` to return a JSON object whose
/// top-level key equals the entity's plural name and holds the record
/// array, e.g. `{"users": [...]}`.
pub struct HttpSource {
    client: reqwest::Client,
    base_url: String,
    probe_interval: Duration,
    probe_max_attempts: u32,
}

impl HttpSource {
    pub fn new(
        base_url: impl Into<String>,
        timeout: Duration,
        probe_interval: Duration,
        probe_max_attempts: u32,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("uap-ingest/0.1")
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            probe_interval,
            probe_max_attempts,
        })
    }

    fn collection_url(&self, kind: EntityKind) -> String {
        format!("{}/{}", self.base_url, kind.plural())
    }
}

#[async_trait]
impl Source for HttpSource {
    async fn probe(&self, kind: EntityKind) -> Result<()> {
        let url = self.collection_url(kind);

        for attempt in 1..=self.probe_max_attempts {
            match self.client.get(&url).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!(entity = %kind, attempt, "availability probe succeeded");
                    return Ok(());
                },
                Ok(response) => {
                    warn!(
                        entity = %kind,
                        attempt,
                        status = %response.status(),
                        "availability probe got unhealthy response"
                    );
                },
                Err(e) => {
                    warn!(entity = %kind, attempt, error = %e, "availability probe failed");
                },
            }

            if attempt < self.probe_max_attempts {
                tokio::time::sleep(self.probe_interval).await;
            }
        }

        Err(IngestError::SourceUnavailable {
            entity: kind,
            attempts: self.probe_max_attempts,
        })
    }

    async fn fetch(&self, kind: EntityKind) -> Result<Batch> {
        let url = self.collection_url(kind);
        debug!(entity = %kind, url = %url, "fetching collection");

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(IngestError::Source {
                entity: kind,
                reason: format!("HTTP status {}", response.status()),
            });
        }

        let body: Value = response.json().await.map_err(|e| IngestError::Source {
            entity: kind,
            reason: format!("invalid JSON body: {}", e),
        })?;

        let records = body
            .get(kind.plural())
            .and_then(Value::as_array)
            .ok_or_else(|| IngestError::Source {
                entity: kind,
                reason: format!("body missing `{}` collection key", kind.plural()),
            })?;

        info!(entity = %kind, records = records.len(), "fetched collection");

        Ok(records.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_for(server: &MockServer, probe_attempts: u32) -> HttpSource {
        HttpSource::new(
            server.uri(),
            Duration::from_secs(5),
            Duration::from_millis(0),
            probe_attempts,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_parses_collection_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [{"id": 1, "firstName": "A"}, {"id": 2, "firstName": "B"}],
                "total": 2
            })))
            .mount(&server)
            .await;

        let source = source_for(&server, 1);
        let batch = source.fetch(EntityKind::Users).await.unwrap();

        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0]["id"], 1);
        assert_eq!(batch[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_fetch_preserves_response_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/todos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "todos": [{"id": 9}, {"id": 3}, {"id": 7}]
            })))
            .mount(&server)
            .await;

        let source = source_for(&server, 1);
        let batch = source.fetch(EntityKind::Todos).await.unwrap();

        let ids: Vec<i64> = batch.iter().map(|r| r["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![9, 3, 7]);
    }

    #[tokio::test]
    async fn test_fetch_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/carts"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let source = source_for(&server, 1);
        let err = source.fetch(EntityKind::Carts).await.unwrap_err();

        assert!(matches!(err, IngestError::Source { entity: EntityKind::Carts, .. }));
    }

    #[tokio::test]
    async fn test_fetch_missing_collection_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/posts"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
            .mount(&server)
            .await;

        let source = source_for(&server, 1);
        let err = source.fetch(EntityKind::Posts).await.unwrap_err();

        match err {
            IngestError::Source { entity, reason } => {
                assert_eq!(entity, EntityKind::Posts);
                assert!(reason.contains("posts"));
            },
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_probe_succeeds_on_healthy_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"users": []})))
            .mount(&server)
            .await;

        let source = source_for(&server, 3);
        assert!(source.probe(EntityKind::Users).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_exhaustion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let source = source_for(&server, 3);
        let err = source.probe(EntityKind::Users).await.unwrap_err();

        assert!(matches!(
            err,
            IngestError::SourceUnavailable { entity: EntityKind::Users, attempts: 3 }
        ));
    }

    #[tokio::test]
    async fn test_probe_recovers_mid_window() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/carts"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/carts"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let source = source_for(&server, 5);
        assert!(source.probe(EntityKind::Carts).await.is_ok());
    }
}
