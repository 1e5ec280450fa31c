/// The tile generation pipeline
use crate::aggregate::aggregate;
use crate::bbox::{resolve_bbox, TileCoordinate};
use crate::collection::{validate_all, CollectionSpec};
use crate::encode::{MvtEncoder, TileEncoder};
use crate::error::Error;
use crate::package::{package, DEFAULT_COMPRESSION_LEVEL};
use crate::store::DocumentStore;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

/// Deadline applied to a whole tile unless configured otherwise.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// What to do when one collection of a tile cannot be rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailureMode {
    /// Fail the whole tile.
    #[default]
    FailFast,
    /// Leave the collection out of the tile and log the failure.
    BestEffort,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GeneratorOptions {
    /// Deadline for a whole tile; in-flight queries are cancelled when it passes.
    pub timeout: Option<Duration>,
    pub failure_mode: FailureMode,
    /// Scan collections without a geometry attribute instead of failing them.
    /// Such scans return up to the result limit regardless of location.
    pub allow_unfiltered: bool,
    /// gzip level, 0 to 9.
    pub compression_level: u32,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        GeneratorOptions {
            timeout: Some(DEFAULT_TIMEOUT),
            failure_mode: FailureMode::FailFast,
            allow_unfiltered: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

/// Renders gzipped vector tiles from the collections of a document store.
///
/// The generator is cheap to share: the store and encoder sit behind `Arc`s
/// and no request state is kept between calls.
#[derive(Clone)]
pub struct TileGenerator {
    store: Arc<dyn DocumentStore>,
    encoder: Arc<dyn TileEncoder>,
    options: GeneratorOptions,
}

impl TileGenerator {
    /// A generator encoding Mapbox vector tiles with the default options.
    pub fn new(store: Arc<dyn DocumentStore>) -> TileGenerator {
        TileGenerator {
            store,
            encoder: Arc::new(MvtEncoder::default()),
            options: GeneratorOptions::default(),
        }
    }

    pub fn with_encoder(mut self, encoder: Arc<dyn TileEncoder>) -> TileGenerator {
        self.encoder = encoder;
        self
    }

    pub fn with_options(mut self, options: GeneratorOptions) -> TileGenerator {
        self.options = options;
        self
    }

    pub fn options(&self) -> &GeneratorOptions {
        &self.options
    }

    /// Renders the tile at `zoom`/`column`/`row` with one layer per collection.
    ///
    /// Returns `Ok(None)` when no collection has features in the tile.
    #[tracing::instrument(level = "debug", skip(self, collections), fields(collections = collections.len()))]
    pub async fn generate(
        &self,
        zoom: u8,
        column: u32,
        row: u32,
        collections: &[CollectionSpec],
    ) -> Result<Option<Vec<u8>>, Error> {
        let tile = TileCoordinate::new(zoom, column, row)?;
        validate_all(collections)?;

        let started = Instant::now();
        let rendered = match self.options.timeout {
            // Dropping the render future on expiry cancels every pending query
            Some(limit) => tokio::time::timeout(limit, self.render(tile, collections))
                .await
                .map_err(|_| Error::Timeout(limit))?,
            None => self.render(tile, collections).await,
        }?;

        match &rendered {
            Some(bytes) => info!(%tile, bytes = bytes.len(), elapsed = ?started.elapsed(), "rendered tile"),
            None => debug!(%tile, elapsed = ?started.elapsed(), "tile is empty"),
        }

        Ok(rendered)
    }

    async fn render(
        &self,
        tile: TileCoordinate,
        collections: &[CollectionSpec],
    ) -> Result<Option<Vec<u8>>, Error> {
        let bbox = resolve_bbox(tile);
        let layers = aggregate(self.store.as_ref(), &bbox, collections, &self.options).await?;

        // Encoding is CPU bound; keep it off the threads serving queries
        let encoder = Arc::clone(&self.encoder);
        let level = self.options.compression_level;
        tokio::task::spawn_blocking(move || package(tile, layers, encoder.as_ref(), level))
            .await
            .map_err(|e| Error::Encoding(format!("encoding task failed: {}", e)))?
    }
}
