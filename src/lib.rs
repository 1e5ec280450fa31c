//! # Elastic MVT
//!
//! Render Mapbox vector tiles straight from geospatial documents stored in
//! Elasticsearch.
//!
//! ## Current features
//!
//! Given a tile address and a list of collections (indices), this crate will
//! query every collection for documents intersecting the tile, concurrently,
//! and pack the results into a single gzipped vector tile with one layer per
//! collection. Each feature carries the document's attributes plus the
//! `_collection`, `_id` and `_score` of the hit it came from.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use elastic_mvt::{CollectionSpec, ElasticsearchStore, TileGenerator};
//! use serde_json::json;
//!
//! # async fn render() -> Result<(), elastic_mvt::Error> {
//! let store = ElasticsearchStore::new("http://localhost:9200", None)?;
//! let generator = TileGenerator::new(Arc::new(store));
//! let collections = vec![
//!     CollectionSpec::new("water_connection")
//!         .with_attribute_filter(json!({ "term": { "connection_type": "Public Tap" } })),
//!     CollectionSpec::new("pipeline"),
//! ];
//!
//! match generator.generate(13, 4762, 4135, &collections).await? {
//!     Some(tile) => println!("{} bytes", tile.len()),
//!     None => println!("empty tile"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Tile sources can also be described in YAML and rendered through the
//! [`TileSource`] trait; see [`source`].
//!
//! ## Known Limitations
//!
//! Geometry is read from either a shape field or a structured sub-document
//! whose `coordinates` hold the location; the attribute is discovered from
//! the collection mapping. Only Point, LineString, Polygon, MultiLineString
//! and MultiPolygon geometries are supported. Geometries are clipped to the
//! tile plus a small buffer, without simplification. Tiles are not cached.

#![deny(warnings)]

// TODO: remove once async fn in traits become object safe
use async_trait::async_trait;

pub mod aggregate;
pub mod bbox;
pub mod collection;
pub mod encode;
pub mod error;
pub mod feature;
pub mod generator;
pub mod package;
pub mod query;
pub mod schema;
pub mod source;
pub mod store;

pub use crate::bbox::{resolve_bbox, BoundingBox, TileCoordinate};
pub use crate::collection::CollectionSpec;
pub use crate::encode::{EncodedTile, MvtEncoder, TileEncoder};
pub use crate::error::Error;
pub use crate::feature::{normalize, Feature, GeometryType, Layer};
pub use crate::generator::{FailureMode, GeneratorOptions, TileGenerator};
pub use crate::schema::{CollectionMetadata, GeometryKind};
pub use crate::source::{ConfiguredSource, TileSourceConfig};
pub use crate::store::{DocumentStore, ElasticsearchStore, Hit, InMemoryStore};

/// A source of vector tiles backed by a fixed set of collections, such as a
/// [`ConfiguredSource`] loaded from YAML.
#[async_trait]
pub trait TileSource: Sized {
    /// Renders the gzipped Mapbox vector tile for a slippy map tile in XYZ format.
    ///
    /// Returns `None` when the tile would have no features.
    async fn render_mvt(&self, zoom: u8, x: u32, y: u32) -> Result<Option<Vec<u8>>, Error>;
}
