/// Per-collection request parameters
use crate::error::Error;

use serde::Deserialize;
use serde_json::{json, Value};

/// Geometry attribute assumed when a collection spec does not name one.
pub const DEFAULT_GEOMETRY_ATTRIBUTE: &str = "geom";

/// Result cap applied when a collection spec does not set one (or sets it to 0).
pub const DEFAULT_RESULT_LIMIT: usize = 10_000;

/// One collection (search index) to render as a layer of the tile.
///
/// Field names in serialized form follow the familiar request shape:
///
/// ```yaml
/// name: water_connection
/// geometry: geom
/// size: 10000
/// query:
///   term:
///     connection_type: Public Tap
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CollectionSpec {
    pub name: String,
    #[serde(rename = "geometry", default = "default_geometry_attribute")]
    pub geometry_attribute: String,
    #[serde(rename = "size", default = "default_result_limit")]
    pub result_limit: usize,
    #[serde(rename = "query", default = "match_all")]
    pub attribute_filter: Value,
}

fn default_geometry_attribute() -> String {
    DEFAULT_GEOMETRY_ATTRIBUTE.to_string()
}

fn default_result_limit() -> usize {
    DEFAULT_RESULT_LIMIT
}

/// The attribute filter that matches every document.
pub fn match_all() -> Value {
    json!({ "match_all": {} })
}

impl CollectionSpec {
    /// A spec for `name` with every optional parameter at its default.
    pub fn new(name: impl Into<String>) -> CollectionSpec {
        CollectionSpec {
            name: name.into(),
            geometry_attribute: default_geometry_attribute(),
            result_limit: DEFAULT_RESULT_LIMIT,
            attribute_filter: match_all(),
        }
    }

    pub fn with_geometry_attribute(mut self, attribute: impl Into<String>) -> CollectionSpec {
        self.geometry_attribute = attribute.into();
        self
    }

    /// Caps the number of documents fetched for this collection. Zero restores the default.
    pub fn with_result_limit(mut self, limit: usize) -> CollectionSpec {
        self.result_limit = limit;
        self
    }

    pub fn with_attribute_filter(mut self, filter: Value) -> CollectionSpec {
        self.attribute_filter = filter;
        self
    }

    /// The number of documents to request from the store.
    pub fn effective_limit(&self) -> usize {
        if self.result_limit == 0 {
            DEFAULT_RESULT_LIMIT
        } else {
            self.result_limit
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidCollection(
                "collection name must not be empty".to_string(),
            ));
        }
        if self.geometry_attribute.trim().is_empty() {
            return Err(Error::InvalidCollection(format!(
                "geometry attribute of {} must not be empty",
                self.name
            )));
        }
        if !self.attribute_filter.is_object() {
            return Err(Error::InvalidCollection(format!(
                "attribute filter of {} must be a query object, got {}",
                self.name, self.attribute_filter
            )));
        }

        Ok(())
    }
}

/// Validates every spec and rejects repeated names, since each name becomes a tile layer.
pub fn validate_all(collections: &[CollectionSpec]) -> Result<(), Error> {
    for (i, spec) in collections.iter().enumerate() {
        spec.validate()?;
        if collections[..i].iter().any(|other| other.name == spec.name) {
            return Err(Error::InvalidCollection(format!(
                "collection {} is requested more than once",
                spec.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let spec = CollectionSpec::new("pipeline");

        assert_eq!("geom", spec.geometry_attribute);
        assert_eq!(10_000, spec.effective_limit());
        assert_eq!(json!({ "match_all": {} }), spec.attribute_filter);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let data = "
- name: water_connection
  geometry: location
  size: 500
  query:
    term:
      connection_type: Public Tap
- name: wss
";
        let specs: Vec<CollectionSpec> = serde_yaml::from_str(data).unwrap();

        assert_eq!(2, specs.len());
        assert_eq!("location", specs[0].geometry_attribute);
        assert_eq!(500, specs[0].effective_limit());
        assert_eq!(
            json!({ "term": { "connection_type": "Public Tap" } }),
            specs[0].attribute_filter
        );
        assert_eq!(CollectionSpec::new("wss"), specs[1]);
    }

    #[test]
    fn test_zero_limit_uses_default() {
        let spec = CollectionSpec::new("wss").with_result_limit(0);
        assert_eq!(DEFAULT_RESULT_LIMIT, spec.effective_limit());

        let spec = spec.with_result_limit(25);
        assert_eq!(25, spec.effective_limit());
    }

    #[test]
    fn test_validation() {
        assert!(CollectionSpec::new("").validate().is_err());
        assert!(CollectionSpec::new("wss")
            .with_geometry_attribute(" ")
            .validate()
            .is_err());
        assert!(CollectionSpec::new("wss")
            .with_attribute_filter(json!("connection_type:tap"))
            .validate()
            .is_err());

        let repeated = vec![CollectionSpec::new("wss"), CollectionSpec::new("wss")];
        assert!(validate_all(&repeated).is_err());

        let distinct = vec![CollectionSpec::new("wss"), CollectionSpec::new("pipeline")];
        assert!(validate_all(&distinct).is_ok());
    }
}
