/// Search queries restricting a collection to a tile
use crate::bbox::BoundingBox;
use crate::schema::{CollectionMetadata, GeometryKind};

use serde_json::{json, Map, Value};

/// Builds the spatial predicate selecting documents that intersect `bbox`.
///
/// Returns `None` when the collection has no known geometry attribute, in
/// which case the collection can only be scanned without spatial filtering.
pub fn build_filter(bbox: &BoundingBox, meta: &CollectionMetadata) -> Option<Value> {
    let attribute = meta.geometry_attribute.as_deref()?;
    let field = match meta.geometry_kind {
        GeometryKind::Shape => attribute.to_string(),
        GeometryKind::Point => format!("{}.coordinates", attribute),
        GeometryKind::Unknown => return None,
    };

    let mut predicate = Map::new();
    predicate.insert(
        field,
        json!({
            "shape": bbox.to_polygon(),
            "relation": "intersects"
        }),
    );

    Some(json!({ "geo_shape": predicate }))
}

/// Combines the caller's attribute filter with an optional spatial predicate.
///
/// The attribute filter is a scoring clause; the spatial predicate only
/// filters and leaves relevance untouched.
pub fn build_query(attribute_filter: &Value, spatial: Option<Value>) -> Value {
    let filter: Vec<Value> = spatial.into_iter().collect();

    json!({
        "bool": {
            "must": attribute_filter,
            "filter": filter
        }
    })
}
