/// Tile source definition files
///
/// A tile source names the document store to read from, the collections to
/// render as layers, and how tiles are produced:
///
/// ```yaml
/// name: Water supply
/// store:
///   url: http://localhost:9200
/// minzoom: 10
/// maxzoom: 18
/// buffer: 256
/// timeout_ms: 10000
/// layers:
///   - name: water_connection
///     geometry: geom
///     size: 10000
///     query:
///       term:
///         connection_type: Public Tap
///   - name: pipeline
///   - name: wss
/// ```
use crate::collection::{validate_all, CollectionSpec};
use crate::encode::{MvtEncoder, DEFAULT_BUFFER, DEFAULT_EXTENT};
use crate::error::Error;
use crate::generator::{FailureMode, GeneratorOptions, TileGenerator, DEFAULT_TIMEOUT};
use crate::package::DEFAULT_COMPRESSION_LEVEL;
use crate::store::{DocumentStore, ElasticsearchStore};
use crate::TileSource;

use std::sync::Arc;
use std::time::Duration;

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;

use serde::Deserialize;
use tracing::debug;

/// A parsed tile source definition.
#[derive(Clone, Deserialize, Debug)]
pub struct TileSourceConfig {
    pub name: String,
    pub store: StoreConfig,
    #[serde(rename = "minzoom", default)]
    pub min_zoom: u8,
    #[serde(rename = "maxzoom", default = "default_max_zoom")]
    pub max_zoom: u8,
    #[serde(default = "default_extent")]
    pub extent: u32,
    /// Margin in tile pixels kept around the tile when clipping geometry.
    #[serde(default = "default_buffer")]
    pub buffer: u32,
    /// Deadline for one tile in milliseconds; 0 disables it.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub best_effort: bool,
    #[serde(default)]
    pub allow_unfiltered: bool,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    pub layers: Vec<CollectionSpec>,
}

#[derive(Clone, Deserialize, Debug)]
pub struct StoreConfig {
    pub url: String,
    /// Per-request timeout in milliseconds.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_zoom() -> u8 {
    22
}

fn default_extent() -> u32 {
    DEFAULT_EXTENT
}

fn default_buffer() -> u32 {
    DEFAULT_BUFFER
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT.as_millis() as u64
}

fn default_compression_level() -> u32 {
    DEFAULT_COMPRESSION_LEVEL
}

impl TileSourceConfig {
    /// Parses and validates a tile source definition from YAML.
    pub fn from(data: &str) -> Result<TileSourceConfig, Error> {
        let config: TileSourceConfig = serde_yaml::from_str(data)?;

        validate_all(&config.layers)?;
        if config.min_zoom > config.max_zoom {
            return Err(Error::InvalidCollection(format!(
                "minzoom {} exceeds maxzoom {} in {}",
                config.min_zoom, config.max_zoom, config.name
            )));
        }

        Ok(config)
    }

    /// Generator options described by this definition.
    pub fn options(&self) -> GeneratorOptions {
        GeneratorOptions {
            timeout: match self.timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            failure_mode: if self.best_effort {
                FailureMode::BestEffort
            } else {
                FailureMode::FailFast
            },
            allow_unfiltered: self.allow_unfiltered,
            compression_level: self.compression_level,
        }
    }

    /// Connects to the configured Elasticsearch store.
    pub fn connect(self) -> Result<ConfiguredSource, Error> {
        let timeout = self.store.timeout_ms.map(Duration::from_millis);
        let store = ElasticsearchStore::new(&self.store.url, timeout)?;

        Ok(self.with_store(Arc::new(store)))
    }

    /// Binds this definition to an already constructed store.
    pub fn with_store(self, store: Arc<dyn DocumentStore>) -> ConfiguredSource {
        let generator = TileGenerator::new(store)
            .with_encoder(Arc::new(MvtEncoder::new(self.extent).with_buffer(self.buffer)))
            .with_options(self.options());

        ConfiguredSource {
            generator,
            config: self,
        }
    }
}

/// A tile source definition bound to its store, ready to render tiles.
#[derive(Clone)]
pub struct ConfiguredSource {
    generator: TileGenerator,
    config: TileSourceConfig,
}

impl ConfiguredSource {
    pub fn config(&self) -> &TileSourceConfig {
        &self.config
    }

    pub fn generator(&self) -> &TileGenerator {
        &self.generator
    }
}

#[async_trait]
impl TileSource for ConfiguredSource {
    async fn render_mvt(&self, zoom: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>, Error> {
        if zoom < self.config.min_zoom || zoom > self.config.max_zoom {
            debug!(source = %self.config.name, zoom, "zoom outside of source range");
            return Ok(None);
        }

        self.generator
            .generate(zoom, x, y, &self.config.layers)
            .await
    }
}
