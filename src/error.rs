use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid YAML in tile source configuration.")]
    Config(#[from] serde_yaml::Error),

    #[error("Invalid collection spec: {0}")]
    InvalidCollection(String),

    #[error("Tile {zoom}/{column}/{row} is outside the tile pyramid.")]
    InvalidTile { zoom: u8, column: u32, row: u32 },

    #[error("Invalid document store URL {0}")]
    InvalidUrl(String),

    #[error("Unable to build the document store client.")]
    Client(#[from] reqwest::Error),

    #[error("Schema unavailable for collection {collection}: {reason}")]
    SchemaUnavailable { collection: String, reason: String },

    #[error("Collection {0} declares no geometry attribute; refusing an unfiltered scan.")]
    NoGeometryAttribute(String),

    #[error("Unsupported geometry type {type_name:?} in document {id} of {collection}")]
    UnsupportedGeometryType {
        collection: String,
        id: String,
        type_name: String,
    },

    #[error("Malformed document {id} in {collection}: {reason}")]
    MalformedDocument {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("Query against {collection} failed: {reason}")]
    QueryExecution { collection: String, reason: String },

    #[error("Tile encoding failed: {0}")]
    Encoding(String),

    #[error("Tile compression failed.")]
    Compression(#[from] std::io::Error),

    #[error("Tile generation exceeded its deadline of {0:?}")]
    Timeout(Duration),
}

impl From<mvt::Error> for Error {
    fn from(err: mvt::Error) -> Self {
        Error::Encoding(err.to_string())
    }
}
