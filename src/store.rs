/// Document stores that tiles are rendered from
use crate::error::Error;

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;

use reqwest::Url;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, trace};

/// One document returned by a search.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Hit {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score", default)]
    pub score: Option<f64>,
    #[serde(rename = "_source", default)]
    pub source: Map<String, Value>,
}

impl Hit {
    pub fn new(id: impl Into<String>, score: Option<f64>, source: Map<String, Value>) -> Hit {
        Hit {
            index: String::new(),
            id: id.into(),
            score,
            source,
        }
    }
}

/// A searchable store of geospatial documents, grouped into named collections.
///
/// Implementations are shared between concurrent tile requests and must
/// tolerate concurrent calls; every call is an independent read.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Returns the top-level field declarations of a collection, keyed by field name.
    async fn get_schema(&self, collection: &str) -> Result<Map<String, Value>, Error>;

    /// Executes `query` against a collection, returning at most `limit` hits
    /// in the order the store ranks them.
    async fn search(&self, collection: &str, query: &Value, limit: usize)
        -> Result<Vec<Hit>, Error>;
}

#[derive(Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Deserialize)]
struct SearchHits {
    hits: Vec<Hit>,
}

/// An Elasticsearch (or OpenSearch) cluster reached over its REST API.
#[derive(Clone, Debug)]
pub struct ElasticsearchStore {
    client: reqwest::Client,
    base_url: Url,
}

impl ElasticsearchStore {
    /// Connects to the cluster at `url`, e.g. `http://localhost:9200`.
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<ElasticsearchStore, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build()?;

        let base_url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{}: {}", url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::InvalidUrl(url.to_string()));
        }

        Ok(ElasticsearchStore { client, base_url })
    }

    /// `{base}/{collection}/{endpoint}`, with the collection percent-encoded as
    /// a single path segment.
    fn url(&self, collection: &str, endpoint: &str) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(&[collection, endpoint]);
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for ElasticsearchStore {
    async fn get_schema(&self, collection: &str) -> Result<Map<String, Value>, Error> {
        let unavailable = |reason: String| Error::SchemaUnavailable {
            collection: collection.to_string(),
            reason,
        };

        let url = self.url(collection, "_mapping")?;
        debug!(%url, "fetching collection mapping");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| unavailable(e.to_string()))?;
        let body: Value = response
            .json()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        mapping_properties(&body, collection)
            .ok_or_else(|| unavailable("response carries no mapping properties".to_string()))
    }

    async fn search(
        &self,
        collection: &str,
        query: &Value,
        limit: usize,
    ) -> Result<Vec<Hit>, Error> {
        let failed = |reason: String| Error::QueryExecution {
            collection: collection.to_string(),
            reason,
        };

        let url = self.url(collection, "_search")?;
        let body = json!({ "size": limit, "query": query });
        trace!(%url, %body, "submitting search");
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| failed(e.to_string()))?;
        let result: SearchResponse = response
            .json()
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(result.hits.hits)
    }
}

/// Extracts the field declarations from a `GET /{index}/_mapping` response.
///
/// The response is keyed by concrete index name, which differs from the
/// requested name when an alias or pattern is used. Properties of every
/// matching index are merged; the first declaration of a field wins.
pub fn mapping_properties(body: &Value, collection: &str) -> Option<Map<String, Value>> {
    let indices = body.as_object()?;
    let declarations: Vec<&Map<String, Value>> = match indices.get(collection) {
        Some(index) => index["mappings"]["properties"].as_object().into_iter().collect(),
        None => indices
            .values()
            .filter_map(|index| index["mappings"]["properties"].as_object())
            .collect(),
    };
    if declarations.is_empty() {
        return None;
    }

    let mut merged = Map::new();
    for properties in declarations {
        for (name, declaration) in properties {
            if !merged.contains_key(name) {
                merged.insert(name.clone(), declaration.clone());
            }
        }
    }

    Some(merged)
}

#[derive(Clone, Debug, Default)]
struct MemoryCollection {
    schema: Map<String, Value>,
    hits: Vec<Hit>,
    latency: Option<Duration>,
    failure: Option<String>,
}

/// A document store held entirely in memory.
///
/// Searches ignore the query and return the collection's documents in
/// insertion order, up to the requested limit. Every submitted query is
/// recorded so callers can inspect what would have been sent to a real store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    collections: HashMap<String, MemoryCollection>,
    queries: Mutex<Vec<(String, Value, usize)>>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }

    /// Registers a collection with the given top-level field declarations.
    pub fn with_collection(mut self, name: &str, schema: Value) -> InMemoryStore {
        let entry = self.collections.entry(name.to_string()).or_default();
        entry.schema = schema.as_object().cloned().unwrap_or_default();
        self
    }

    pub fn with_hits(mut self, name: &str, hits: Vec<Hit>) -> InMemoryStore {
        self.collections
            .entry(name.to_string())
            .or_default()
            .hits
            .extend(hits);
        self
    }

    /// Delays every search against `name`.
    pub fn with_latency(mut self, name: &str, latency: Duration) -> InMemoryStore {
        self.collections.entry(name.to_string()).or_default().latency = Some(latency);
        self
    }

    /// Makes every search against `name` fail with `reason`.
    pub fn with_failure(mut self, name: &str, reason: &str) -> InMemoryStore {
        self.collections.entry(name.to_string()).or_default().failure = Some(reason.to_string());
        self
    }

    /// Queries submitted so far, as (collection, query, limit).
    pub fn queries(&self) -> Vec<(String, Value, usize)> {
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_schema(&self, collection: &str) -> Result<Map<String, Value>, Error> {
        self.collections
            .get(collection)
            .map(|c| c.schema.clone())
            .ok_or_else(|| Error::SchemaUnavailable {
                collection: collection.to_string(),
                reason: "no such collection".to_string(),
            })
    }

    async fn search(
        &self,
        collection: &str,
        query: &Value,
        limit: usize,
    ) -> Result<Vec<Hit>, Error> {
        {
            let mut queries = self.queries.lock().unwrap_or_else(|e| e.into_inner());
            queries.push((collection.to_string(), query.clone(), limit));
        }

        let stored = self
            .collections
            .get(collection)
            .ok_or_else(|| Error::QueryExecution {
                collection: collection.to_string(),
                reason: "no such collection".to_string(),
            })?;
        if let Some(latency) = stored.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(reason) = &stored.failure {
            return Err(Error::QueryExecution {
                collection: collection.to_string(),
                reason: reason.clone(),
            });
        }

        Ok(stored
            .hits
            .iter()
            .take(limit)
            .cloned()
            .map(|mut hit| {
                hit.index = collection.to_string();
                hit
            })
            .collect())
    }
}
