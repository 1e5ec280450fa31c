/// Slippy map tile coordinates and their geographic extents
use crate::error::Error;

use serde_json::{json, Value};
use slippy_map_tilenames::tile2lonlat;

/// Highest zoom level accepted for a tile request.
pub const MAX_ZOOM: u8 = 30;

/// Latitude bound of the spherical mercator tile pyramid, `atan(sinh(π))` in degrees.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

/// The (zoom, column, row) address of one tile in the XYZ pyramid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub column: u32,
    pub row: u32,
}

impl TileCoordinate {
    /// Constructs a tile coordinate, rejecting addresses outside the pyramid at `zoom`.
    pub fn new(zoom: u8, column: u32, row: u32) -> Result<TileCoordinate, Error> {
        let invalid = Error::InvalidTile { zoom, column, row };
        if zoom > MAX_ZOOM {
            return Err(invalid);
        }

        let tiles_per_side = 1u32 << zoom;
        if column >= tiles_per_side || row >= tiles_per_side {
            return Err(invalid);
        }

        Ok(TileCoordinate { zoom, column, row })
    }
}

impl std::fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.column, self.row)
    }
}

/// Geographic extent of a tile, in degrees.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    /// The box as a closed GeoJSON polygon, counter-clockwise from the south-west corner.
    pub fn to_polygon(&self) -> Value {
        json!({
            "type": "Polygon",
            "coordinates": [[
                [self.min_lon, self.min_lat],
                [self.max_lon, self.min_lat],
                [self.max_lon, self.max_lat],
                [self.min_lon, self.max_lat],
                [self.min_lon, self.min_lat],
            ]]
        })
    }

    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        (self.min_lon..=self.max_lon).contains(&lon) && (self.min_lat..=self.max_lat).contains(&lat)
    }
}

/// Resolves the bounding box of a tile using the standard slippy map scheme.
///
/// The north-west corner of the tile and the north-west corner of the tile
/// diagonally below it bound the tile on all four sides.
pub fn resolve_bbox(tile: TileCoordinate) -> BoundingBox {
    let (min_lon, max_lat) = tile2lonlat(tile.column, tile.row, tile.zoom);
    let (max_lon, min_lat) = tile2lonlat(tile.column + 1, tile.row + 1, tile.zoom);

    BoundingBox {
        min_lon,
        min_lat,
        max_lon,
        max_lat,
    }
}
