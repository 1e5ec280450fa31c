/// Discovery of the geometry attribute of a collection
use crate::error::Error;
use crate::store::DocumentStore;

use serde_json::{Map, Value};
use tracing::debug;

/// Declared field types that hold a shape geometry.
pub const SHAPE_FIELD_TYPES: &[&str] = &["geo_shape"];

/// How a collection stores its geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GeometryKind {
    /// A shape-typed field holding GeoJSON-like geometry.
    Shape,
    /// A structured sub-document whose `coordinates` carry the location.
    Point,
    /// No geometry attribute was found in the schema.
    Unknown,
}

impl GeometryKind {
    /// Classifies one field declaration from a collection schema.
    pub fn of_declaration(declaration: &Value) -> GeometryKind {
        if declaration.get("properties").is_some() {
            return GeometryKind::Point;
        }

        match declaration.get("type").and_then(Value::as_str) {
            Some(field_type) if SHAPE_FIELD_TYPES.contains(&field_type) => GeometryKind::Shape,
            _ => GeometryKind::Unknown,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionMetadata {
    pub geometry_attribute: Option<String>,
    pub geometry_kind: GeometryKind,
    /// Every top-level attribute, in schema order.
    pub attribute_names: Vec<String>,
}

impl CollectionMetadata {
    /// Derives metadata from a collection's top-level field declarations.
    ///
    /// When several fields could hold geometry, `preferred` wins if it is one
    /// of them; otherwise the first in schema order is used.
    pub fn from_schema(properties: &Map<String, Value>, preferred: &str) -> CollectionMetadata {
        let candidates: Vec<(&String, GeometryKind)> = properties
            .iter()
            .map(|(name, declaration)| (name, GeometryKind::of_declaration(declaration)))
            .filter(|(_, kind)| *kind != GeometryKind::Unknown)
            .collect();

        let chosen = candidates
            .iter()
            .find(|(name, _)| name.as_str() == preferred)
            .or_else(|| candidates.first());

        CollectionMetadata {
            geometry_attribute: chosen.map(|(name, _)| name.to_string()),
            geometry_kind: chosen.map_or(GeometryKind::Unknown, |(_, kind)| *kind),
            attribute_names: properties.keys().cloned().collect(),
        }
    }
}

/// Fetches the schema of `collection` and derives its metadata.
pub async fn inspect(
    store: &dyn DocumentStore,
    collection: &str,
    preferred: &str,
) -> Result<CollectionMetadata, Error> {
    let properties = store.get_schema(collection).await?;
    let metadata = CollectionMetadata::from_schema(&properties, preferred);
    debug!(
        collection,
        attribute = ?metadata.geometry_attribute,
        kind = ?metadata.geometry_kind,
        "inspected collection schema"
    );

    Ok(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::store::InMemoryStore;

    use serde_json::json;

    fn schema(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_shape_field() {
        let properties = schema(json!({
            "connection_type": { "type": "keyword" },
            "geom": { "type": "geo_shape" },
            "installed": { "type": "date" }
        }));
        let metadata = CollectionMetadata::from_schema(&properties, "geom");

        assert_eq!(Some("geom".to_string()), metadata.geometry_attribute);
        assert_eq!(GeometryKind::Shape, metadata.geometry_kind);
        assert_eq!(
            vec!["connection_type", "geom", "installed"],
            metadata.attribute_names
        );
    }

    #[test]
    fn test_point_sub_document() {
        let properties = schema(json!({
            "name": { "type": "text" },
            "location": {
                "properties": {
                    "type": { "type": "keyword" },
                    "coordinates": { "type": "geo_point" }
                }
            }
        }));
        let metadata = CollectionMetadata::from_schema(&properties, "geom");

        assert_eq!(Some("location".to_string()), metadata.geometry_attribute);
        assert_eq!(GeometryKind::Point, metadata.geometry_kind);
    }

    #[test]
    fn test_preferred_candidate_wins() {
        let properties = schema(json!({
            "address": { "properties": { "street": { "type": "text" } } },
            "geom": { "type": "geo_shape" }
        }));

        let metadata = CollectionMetadata::from_schema(&properties, "geom");
        assert_eq!(Some("geom".to_string()), metadata.geometry_attribute);
        assert_eq!(GeometryKind::Shape, metadata.geometry_kind);

        let metadata = CollectionMetadata::from_schema(&properties, "outline");
        assert_eq!(Some("address".to_string()), metadata.geometry_attribute);
        assert_eq!(GeometryKind::Point, metadata.geometry_kind);
    }

    #[test]
    fn test_no_geometry() {
        let properties = schema(json!({
            "name": { "type": "text" },
            "position": { "type": "geo_point" }
        }));
        let metadata = CollectionMetadata::from_schema(&properties, "geom");

        assert_eq!(None, metadata.geometry_attribute);
        assert_eq!(GeometryKind::Unknown, metadata.geometry_kind);
        assert_eq!(2, metadata.attribute_names.len());
    }

    #[tokio::test]
    async fn test_inspect() {
        let store = InMemoryStore::new()
            .with_collection("pipeline", json!({ "geom": { "type": "geo_shape" } }));

        let metadata = inspect(&store, "pipeline", "geom").await.unwrap();
        assert_eq!(GeometryKind::Shape, metadata.geometry_kind);

        match inspect(&store, "wss", "geom").await {
            Err(Error::SchemaUnavailable { collection, .. }) => assert_eq!("wss", collection),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
