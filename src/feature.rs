/// Normalization of search hits into tile features
use crate::error::Error;
use crate::store::Hit;

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

/// Property holding the name of the collection a feature came from.
pub const COLLECTION_PROPERTY: &str = "_collection";
/// Property holding the document identifier.
pub const ID_PROPERTY: &str = "_id";
/// Property holding the relevance score of the document.
pub const SCORE_PROPERTY: &str = "_score";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Point,
    LineString,
    Polygon,
    MultiLineString,
    MultiPolygon,
}

static GEOMETRY_TYPES: Lazy<HashMap<&'static str, GeometryType>> = Lazy::new(|| {
    HashMap::from([
        ("point", GeometryType::Point),
        ("linestring", GeometryType::LineString),
        ("polygon", GeometryType::Polygon),
        ("multilinestring", GeometryType::MultiLineString),
        ("multipolygon", GeometryType::MultiPolygon),
    ])
});

impl GeometryType {
    /// Looks up a declared geometry type name, ignoring case.
    pub fn from_name(name: &str) -> Option<GeometryType> {
        GEOMETRY_TYPES.get(name.to_lowercase().as_str()).copied()
    }

    /// The canonical GeoJSON name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::LineString => "LineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::MultiPolygon => "MultiPolygon",
        }
    }
}

/// One geometry with its attributes, destined for a single layer.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub geometry_type: GeometryType,
    /// Coordinates nested as in GeoJSON, longitude first.
    pub coordinates: Value,
    pub properties: Map<String, Value>,
}

/// A named group of features rendered together in a tile.
#[derive(Clone, Debug, PartialEq)]
pub struct Layer {
    pub name: String,
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn new(name: impl Into<String>, features: Vec<Feature>) -> Layer {
        Layer {
            name: name.into(),
            features,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Converts a search hit into a feature.
///
/// The geometry attribute is removed from the properties, the remaining
/// attributes keep their order and shape, and the reserved `_collection`,
/// `_id` and `_score` properties are set, replacing any attribute of the
/// same name.
pub fn normalize(hit: Hit, collection: &str, geometry_attribute: &str) -> Result<Feature, Error> {
    let Hit {
        id,
        score,
        source: mut properties,
        ..
    } = hit;
    let malformed = |reason: &str| Error::MalformedDocument {
        collection: collection.to_string(),
        id: id.clone(),
        reason: reason.to_string(),
    };

    let mut geometry = match properties.shift_remove(geometry_attribute) {
        Some(Value::Object(geometry)) => geometry,
        Some(_) => return Err(malformed("geometry is not an object")),
        None => return Err(malformed("document has no geometry attribute")),
    };
    let type_name = geometry
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| malformed("geometry has no type name"))?;
    let geometry_type =
        GeometryType::from_name(type_name).ok_or_else(|| Error::UnsupportedGeometryType {
            collection: collection.to_string(),
            id: id.clone(),
            type_name: type_name.to_string(),
        })?;
    let coordinates = geometry
        .remove("coordinates")
        .ok_or_else(|| malformed("geometry has no coordinates"))?;

    properties.insert(COLLECTION_PROPERTY.to_string(), json!(collection));
    properties.insert(ID_PROPERTY.to_string(), json!(id));
    properties.insert(SCORE_PROPERTY.to_string(), json!(score));

    Ok(Feature {
        geometry_type,
        coordinates,
        properties,
    })
}
