/// Mapbox vector tile encoding of feature layers
use crate::bbox::{TileCoordinate, MAX_LATITUDE};
use crate::error::Error;
use crate::feature::{Feature, GeometryType, Layer, ID_PROPERTY};

use std::f64::consts::PI;

use mvt::{GeomData, GeomEncoder, GeomType, Tile};
use serde_json::Value;
use tracing::debug;

/// Default width and height of a tile in its own coordinate space.
pub const DEFAULT_EXTENT: u32 = 4096;

/// Default margin, in tile pixels, kept around the tile when clipping.
pub const DEFAULT_BUFFER: u32 = 256;

/// A serialized tile, before compression.
#[derive(Clone, Debug, PartialEq)]
pub struct EncodedTile {
    pub bytes: Vec<u8>,
    pub num_layers: usize,
}

impl EncodedTile {
    /// True when no layer made it into the tile.
    pub fn is_empty(&self) -> bool {
        self.num_layers == 0
    }
}

/// Serializes named feature layers into a binary tile.
pub trait TileEncoder: Send + Sync {
    fn encode(&self, tile: TileCoordinate, layers: &[Layer]) -> Result<EncodedTile, Error>;
}

/// Encodes layers as a Mapbox Vector Tile.
///
/// Coordinates are projected from longitude/latitude into the tile's pixel
/// grid with spherical mercator, then clipped to the tile plus a buffer of
/// `buffer` pixels on every side. Features with nothing left inside that
/// window, or whose geometry collapses at the tile resolution, are dropped,
/// as are layers left without features.
#[derive(Clone, Copy, Debug)]
pub struct MvtEncoder {
    extent: u32,
    buffer: u32,
}

impl Default for MvtEncoder {
    fn default() -> Self {
        MvtEncoder::new(DEFAULT_EXTENT)
    }
}

impl MvtEncoder {
    pub fn new(extent: u32) -> MvtEncoder {
        MvtEncoder {
            extent,
            buffer: DEFAULT_BUFFER,
        }
    }

    pub fn with_buffer(self, buffer: u32) -> MvtEncoder {
        MvtEncoder { buffer, ..self }
    }

    pub fn extent(&self) -> u32 {
        self.extent
    }

    pub fn buffer(&self) -> u32 {
        self.buffer
    }

    fn encode_layer(&self, tile: &Tile, grid: &TileGrid, layer: &Layer) -> Result<mvt::Layer, Error> {
        let mut mvt_layer = tile.create_layer(&layer.name);
        for (i, feature) in layer.features.iter().enumerate() {
            let geom_data = match encode_geometry(grid, feature).map_err(|e| {
                Error::Encoding(format!("feature {} of layer {}: {}", i, layer.name, e))
            })? {
                Some(geom_data) => geom_data,
                None => {
                    debug!(layer = %layer.name, feature = i, "dropping geometry with nothing to draw in the tile");
                    continue;
                }
            };

            let mut mvt_feature = mvt_layer.into_feature(geom_data);
            if let Some(id) = feature
                .properties
                .get(ID_PROPERTY)
                .and_then(Value::as_str)
                .and_then(|id| id.parse::<u64>().ok())
            {
                mvt_feature.set_id(id);
            }
            for (key, value) in &feature.properties {
                match value {
                    Value::Null => {}
                    Value::Bool(b) => mvt_feature.add_tag_bool(key, *b),
                    Value::Number(n) => {
                        if let Some(u) = n.as_u64() {
                            mvt_feature.add_tag_uint(key, u);
                        } else if let Some(i) = n.as_i64() {
                            mvt_feature.add_tag_sint(key, i);
                        } else if let Some(f) = n.as_f64() {
                            mvt_feature.add_tag_double(key, f);
                        }
                    }
                    Value::String(s) => mvt_feature.add_tag_string(key, s),
                    // Tags are flat, so nested values travel as JSON text
                    nested => mvt_feature.add_tag_string(key, &nested.to_string()),
                }
            }
            mvt_layer = mvt_feature.into_layer();
        }

        Ok(mvt_layer)
    }
}

impl TileEncoder for MvtEncoder {
    fn encode(&self, tile: TileCoordinate, layers: &[Layer]) -> Result<EncodedTile, Error> {
        let grid = TileGrid::new(tile, self.extent, self.buffer);
        let mut mvt_tile = Tile::new(self.extent);

        for layer in layers {
            let mvt_layer = self.encode_layer(&mvt_tile, &grid, layer)?;
            if mvt_layer.num_features() > 0 {
                mvt_tile.add_layer(mvt_layer)?;
            } else {
                debug!(layer = %layer.name, %tile, "layer has no encodable features");
            }
        }

        Ok(EncodedTile {
            num_layers: mvt_tile.num_layers(),
            bytes: mvt_tile.to_bytes()?,
        })
    }
}

/// Projection from longitude/latitude into the pixel grid of one tile, and
/// the clip window around it.
struct TileGrid {
    scale: f64,
    column: f64,
    row: f64,
    extent: f64,
    min: f64,
    max: f64,
}

type Point = (f64, f64);

impl TileGrid {
    fn new(tile: TileCoordinate, extent: u32, buffer: u32) -> TileGrid {
        TileGrid {
            scale: f64::from(1u32 << tile.zoom),
            column: f64::from(tile.column),
            row: f64::from(tile.row),
            extent: f64::from(extent),
            min: -f64::from(buffer),
            max: f64::from(extent) + f64::from(buffer),
        }
    }

    /// Unrounded pixel position; far away positions may lie well outside
    /// the clip window.
    fn project(&self, lon: f64, lat: f64) -> Point {
        let lat = lat.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (lon + 180.0) / 360.0;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0;

        (
            (x * self.scale - self.column) * self.extent,
            (y * self.scale - self.row) * self.extent,
        )
    }

    fn contains(&self, (x, y): Point) -> bool {
        (self.min..=self.max).contains(&x) && (self.min..=self.max).contains(&y)
    }
}

/// Clips a ring to the window `[min, max]` on both axes (Sutherland-Hodgman).
fn clip_ring(ring: &[Point], min: f64, max: f64) -> Vec<Point> {
    let mut output = ring.to_vec();
    output = clip_against_edge(&output, |p| p.0 >= min, |a, b| {
        (min, a.1 + (min - a.0) / (b.0 - a.0) * (b.1 - a.1))
    });
    output = clip_against_edge(&output, |p| p.0 <= max, |a, b| {
        (max, a.1 + (max - a.0) / (b.0 - a.0) * (b.1 - a.1))
    });
    output = clip_against_edge(&output, |p| p.1 >= min, |a, b| {
        (a.0 + (min - a.1) / (b.1 - a.1) * (b.0 - a.0), min)
    });
    clip_against_edge(&output, |p| p.1 <= max, |a, b| {
        (a.0 + (max - a.1) / (b.1 - a.1) * (b.0 - a.0), max)
    })
}

fn clip_against_edge<F, I>(ring: &[Point], inside: F, intersect: I) -> Vec<Point>
where
    F: Fn(&Point) -> bool,
    I: Fn(&Point, &Point) -> Point,
{
    let mut output = Vec::with_capacity(ring.len());
    for (i, current) in ring.iter().enumerate() {
        let next = &ring[(i + 1) % ring.len()];
        match (inside(current), inside(next)) {
            (true, true) => output.push(*next),
            (true, false) => output.push(intersect(current, next)),
            (false, true) => {
                output.push(intersect(current, next));
                output.push(*next);
            }
            (false, false) => {}
        }
    }
    output
}

/// The part of segment `a`-`b` inside the window (Liang-Barsky). Endpoints
/// that need no clipping are returned unchanged.
fn clip_segment(a: Point, b: Point, min: f64, max: f64) -> Option<(Point, Point)> {
    let (dx, dy) = (b.0 - a.0, b.1 - a.1);
    let (mut t0, mut t1) = (0.0_f64, 1.0_f64);
    for (p, q) in [(-dx, a.0 - min), (dx, max - a.0), (-dy, a.1 - min), (dy, max - a.1)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else if p < 0.0 {
            let r = q / p;
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            let r = q / p;
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| (a.0 + t * dx, a.1 + t * dy);
    let start = if t0 == 0.0 { a } else { at(t0) };
    let end = if t1 == 1.0 { b } else { at(t1) };
    Some((start, end))
}

/// Clips a line to the window `[min, max]`, splitting it where it leaves and
/// re-enters.
fn clip_line(points: &[Point], min: f64, max: f64) -> Vec<Vec<Point>> {
    let mut parts: Vec<Vec<Point>> = Vec::new();
    let mut current: Vec<Point> = Vec::new();
    for segment in points.windows(2) {
        match clip_segment(segment[0], segment[1], min, max) {
            Some((start, end)) => {
                if current.last() != Some(&start) {
                    if current.len() > 1 {
                        parts.push(std::mem::take(&mut current));
                    }
                    current = vec![start];
                }
                current.push(end);
            }
            None => {
                if current.len() > 1 {
                    parts.push(std::mem::take(&mut current));
                }
                current.clear();
            }
        }
    }
    if current.len() > 1 {
        parts.push(current);
    }
    parts
}

/// Rounds to whole pixels and drops consecutive duplicates.
fn snap(points: impl IntoIterator<Item = Point>) -> Vec<Point> {
    let mut snapped: Vec<Point> = Vec::new();
    for (x, y) in points {
        let point = (x.round(), y.round());
        if snapped.last() != Some(&point) {
            snapped.push(point);
        }
    }
    snapped
}

fn position(value: &Value) -> Result<(f64, f64), String> {
    match value.as_array().map(Vec::as_slice) {
        Some([lon, lat, ..]) => match (lon.as_f64(), lat.as_f64()) {
            (Some(lon), Some(lat)) if lon.is_finite() && lat.is_finite() => Ok((lon, lat)),
            _ => Err(format!("non-numeric position {}", value)),
        },
        _ => Err(format!("invalid position {}", value)),
    }
}

fn nested(value: &Value) -> Result<&Vec<Value>, String> {
    value
        .as_array()
        .ok_or_else(|| format!("expected an array of coordinates, got {}", value))
}

/// Projects a sequence of positions into the tile's pixel space.
fn path(grid: &TileGrid, value: &Value) -> Result<Vec<Point>, String> {
    nested(value)?
        .iter()
        .map(|coordinate| position(coordinate).map(|(lon, lat)| grid.project(lon, lat)))
        .collect()
}

/// Twice the signed area of a ring; positive when clockwise with y pointing down.
fn signed_area(points: &[Point]) -> f64 {
    let mut area = 0.0;
    for (i, (x0, y0)) in points.iter().enumerate() {
        let (x1, y1) = points[(i + 1) % points.len()];
        area += x0 * y1 - x1 * y0;
    }
    area
}

/// Like `path`, clipped to the tile, without the closing point and wound the
/// way vector tiles expect: exterior rings clockwise, interior rings
/// counter-clockwise. `None` when nothing of the ring remains at tile
/// resolution.
fn ring(grid: &TileGrid, value: &Value, exterior: bool) -> Result<Option<Vec<Point>>, String> {
    let mut points = snap(clip_ring(&path(grid, value)?, grid.min, grid.max));
    if points.len() > 1 && points.first() == points.last() {
        points.pop();
    }
    if points.len() < 3 {
        return Ok(None);
    }

    let area = signed_area(&points);
    if area == 0.0 {
        return Ok(None);
    }
    if (area > 0.0) != exterior {
        points.reverse();
    }

    Ok(Some(points))
}

/// Drawable parts of one polygon: its exterior followed by its holes.
fn polygon_parts(grid: &TileGrid, value: &Value) -> Result<Vec<Vec<Point>>, String> {
    let mut rings = nested(value)?.iter();
    let exterior = match rings.next() {
        Some(exterior) => ring(grid, exterior, true)?,
        None => None,
    };

    let mut parts = match exterior {
        Some(exterior) => vec![exterior],
        None => return Ok(vec![]),
    };
    for interior in rings {
        if let Some(interior) = ring(grid, interior, false)? {
            parts.push(interior);
        }
    }

    Ok(parts)
}

fn line_parts(grid: &TileGrid, value: &Value) -> Result<Vec<Vec<Point>>, String> {
    Ok(clip_line(&path(grid, value)?, grid.min, grid.max)
        .into_iter()
        .map(snap)
        .filter(|part| part.len() > 1)
        .collect())
}

/// Projects the geometry of a feature into drawable parts, clipped to the
/// tile: one point, line strings, or polygon rings.
fn geometry_parts(grid: &TileGrid, feature: &Feature) -> Result<Vec<Vec<Point>>, String> {
    let coordinates = &feature.coordinates;
    match feature.geometry_type {
        GeometryType::Point => {
            let (lon, lat) = position(coordinates)?;
            let point = grid.project(lon, lat);
            Ok(if grid.contains(point) {
                vec![snap([point])]
            } else {
                vec![]
            })
        }
        GeometryType::LineString => line_parts(grid, coordinates),
        GeometryType::MultiLineString => {
            let mut parts = vec![];
            for line in nested(coordinates)? {
                parts.extend(line_parts(grid, line)?);
            }
            Ok(parts)
        }
        GeometryType::Polygon => polygon_parts(grid, coordinates),
        GeometryType::MultiPolygon => {
            let mut parts = vec![];
            for polygon in nested(coordinates)? {
                parts.extend(polygon_parts(grid, polygon)?);
            }
            Ok(parts)
        }
    }
}

/// Encodes the geometry of a feature, or `None` when nothing drawable remains.
fn encode_geometry(grid: &TileGrid, feature: &Feature) -> Result<Option<GeomData>, String> {
    let parts = geometry_parts(grid, feature)?;
    if parts.is_empty() {
        return Ok(None);
    }

    let (geom_type, multipart) = match feature.geometry_type {
        GeometryType::Point => (GeomType::Point, false),
        GeometryType::LineString | GeometryType::MultiLineString => (GeomType::Linestring, true),
        GeometryType::Polygon | GeometryType::MultiPolygon => (GeomType::Polygon, true),
    };

    let mut encoder = GeomEncoder::new(geom_type);
    for part in parts {
        for (x, y) in part {
            encoder = encoder.point(x, y).map_err(|e| e.to_string())?;
        }
        if multipart {
            encoder = encoder.complete().map_err(|e| e.to_string())?;
        }
    }

    encoder.encode().map(Some).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::bbox::resolve_bbox;

    use assert_approx_eq::assert_approx_eq;
    use serde_json::{json, Map};

    fn feature(geometry_type: GeometryType, coordinates: Value, properties: Value) -> Feature {
        Feature {
            geometry_type,
            coordinates,
            properties: properties.as_object().cloned().unwrap_or_else(Map::new),
        }
    }

    fn world() -> TileCoordinate {
        TileCoordinate::new(0, 0, 0).unwrap()
    }

    fn grid(tile: TileCoordinate) -> TileGrid {
        TileGrid::new(tile, DEFAULT_EXTENT, DEFAULT_BUFFER)
    }

    fn assert_point(expected: Point, actual: Point) {
        assert_approx_eq!(expected.0, actual.0, 1e-6);
        assert_approx_eq!(expected.1, actual.1, 1e-6);
    }

    #[test]
    fn test_projection() {
        let grid = grid(world());

        assert_point((2048.0, 2048.0), grid.project(0.0, 0.0));
        assert_point((0.0, 0.0), grid.project(-180.0, MAX_LATITUDE));
        assert_point((4096.0, 4096.0), grid.project(180.0, -89.9));

        // The north-west corner of a deeper tile lands on its own origin
        let tile = TileCoordinate::new(13, 4762, 4135).unwrap();
        let bbox = resolve_bbox(tile);
        let grid = self::grid(tile);
        assert_point((0.0, 0.0), grid.project(bbox.min_lon, bbox.max_lat));
        assert_point((4096.0, 4096.0), grid.project(bbox.max_lon, bbox.min_lat));
    }

    #[test]
    fn test_rings_drop_closing_and_repeated_points() {
        let grid = grid(world());
        let closed = json!([[0.0, 0.0], [0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 0.0]]);
        assert_eq!(3, ring(&grid, &closed, true).unwrap().unwrap().len());

        let collapsed = json!([[0.0, 0.0], [0.00001, 0.0], [0.0, 0.0]]);
        assert_eq!(None, ring(&grid, &collapsed, true).unwrap());

        let flat = json!([[0.0, 0.0], [10.0, 0.0], [20.0, 0.0], [0.0, 0.0]]);
        assert_eq!(None, ring(&grid, &flat, true).unwrap());
    }

    #[test]
    fn test_ring_winding() {
        let grid = grid(world());
        // Counter-clockwise on the map, as GeoJSON writes exteriors
        let ccw = json!([[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0], [0.0, 0.0]]);
        let cw = json!([[0.0, 0.0], [0.0, 10.0], [10.0, 10.0], [10.0, 0.0], [0.0, 0.0]]);

        for value in [&ccw, &cw] {
            let exterior = ring(&grid, value, true).unwrap().unwrap();
            assert!(signed_area(&exterior) > 0.0);

            let interior = ring(&grid, value, false).unwrap().unwrap();
            assert!(signed_area(&interior) < 0.0);
        }
    }

    #[test]
    fn test_encode_all_geometry_types() {
        let square = json!([[[0.0, 0.0], [20.0, 0.0], [20.0, 20.0], [0.0, 20.0], [0.0, 0.0]]]);
        let layer = Layer::new(
            "shapes",
            vec![
                feature(GeometryType::Point, json!([85.3, 27.7]), json!({ "_id": "12" })),
                feature(GeometryType::LineString, json!([[0.0, 0.0], [30.0, 30.0]]), json!({})),
                feature(GeometryType::Polygon, square.clone(), json!({ "name": "square" })),
                feature(
                    GeometryType::MultiLineString,
                    json!([[[0.0, 0.0], [30.0, 30.0]], [[40.0, 40.0], [50.0, 10.0]]]),
                    json!({}),
                ),
                feature(GeometryType::MultiPolygon, json!([square]), json!({ "nested": { "a": [1, 2] } })),
            ],
        );

        let encoded = MvtEncoder::default().encode(world(), &[layer]).unwrap();

        assert_eq!(1, encoded.num_layers);
        assert!(!encoded.is_empty());
        assert!(!encoded.bytes.is_empty());
    }

    #[test]
    fn test_clip_ring_to_window() {
        // A square hanging off the left edge is cut at the buffer line
        let square = [(-1000.0, 100.0), (1000.0, 100.0), (1000.0, 1000.0), (-1000.0, 1000.0)];
        let clipped = clip_ring(&square, -256.0, 4352.0);

        assert_eq!(4, clipped.len());
        for (x, y) in &clipped {
            assert!((-256.0..=1000.0).contains(x), "{}", x);
            assert!((100.0..=1000.0).contains(y), "{}", y);
        }
        assert_approx_eq!(2.0 * 1256.0 * 900.0, signed_area(&clipped).abs(), 1e-6);

        let outside = [(5000.0, 0.0), (6000.0, 0.0), (6000.0, 100.0)];
        assert!(clip_ring(&outside, -256.0, 4352.0).is_empty());
    }

    #[test]
    fn test_clip_line_splits_on_reentry() {
        let line = [(100.0, 100.0), (100.0, -1000.0), (200.0, -1000.0), (200.0, 100.0)];
        let parts = clip_line(&line, -256.0, 4352.0);

        assert_eq!(2, parts.len());
        assert_eq!((100.0, 100.0), parts[0][0]);
        assert_point((100.0, -256.0), parts[0][1]);
        assert_point((200.0, -256.0), parts[1][0]);
        assert_eq!((200.0, 100.0), parts[1][1]);

        // Unclipped vertices stay joined in one part
        let inside = [(0.0, 0.0), (10.0, 10.0), (20.0, 0.0)];
        assert_eq!(vec![inside.to_vec()], clip_line(&inside, -256.0, 4352.0));

        assert!(clip_line(&[(-500.0, 0.0), (-500.0, 10.0)], -256.0, 4352.0).is_empty());
    }

    #[test]
    fn test_line_crossing_tile() {
        let tile = TileCoordinate::new(13, 4762, 4135).unwrap();
        let bbox = resolve_bbox(tile);
        let lat = (bbox.min_lat + bbox.max_lat) / 2.0;
        let crossing = feature(
            GeometryType::LineString,
            json!([[bbox.min_lon - 1.0, lat], [bbox.max_lon + 1.0, lat]]),
            json!({}),
        );

        let parts = geometry_parts(&grid(tile), &crossing).unwrap();

        assert_eq!(1, parts.len());
        assert_eq!(2, parts[0].len());
        assert_eq!(-256.0, parts[0][0].0);
        assert_eq!(4352.0, parts[0][1].0);
        assert!((2040.0..=2056.0).contains(&parts[0][0].1));
    }

    #[test]
    fn test_large_polygon_on_deep_tile() {
        let tile = TileCoordinate::new(24, 12_582_912, 6_080_000).unwrap();
        let bbox = resolve_bbox(tile);
        let (lon, lat) = (bbox.min_lon, bbox.min_lat);
        let district = json!([[
            [lon - 10.0, lat - 10.0],
            [lon + 10.0, lat - 10.0],
            [lon + 10.0, lat + 10.0],
            [lon - 10.0, lat + 10.0],
            [lon - 10.0, lat - 10.0]
        ]]);
        let district = feature(GeometryType::Polygon, district, json!({ "_id": "3" }));

        // The whole tile lies inside, so only the buffered window is left
        let parts = geometry_parts(&grid(tile), &district).unwrap();
        assert_eq!(1, parts.len());
        for (x, y) in &parts[0] {
            assert!(*x == -256.0 || *x == 4352.0, "{}", x);
            assert!(*y == -256.0 || *y == 4352.0, "{}", y);
        }
        assert_eq!(2.0 * 4608.0 * 4608.0, signed_area(&parts[0]));

        let layer = Layer::new("district", vec![district]);
        let encoded = MvtEncoder::default().encode(tile, &[layer]).unwrap();
        assert_eq!(1, encoded.num_layers);
    }

    #[test]
    fn test_points_outside_tile_are_dropped() {
        let tile = TileCoordinate::new(24, 12_582_912, 6_080_000).unwrap();
        let bbox = resolve_bbox(tile);
        let layer = Layer::new(
            "taps",
            vec![
                feature(GeometryType::Point, json!([85.3, 27.7]), json!({})),
                feature(GeometryType::Point, json!([bbox.min_lon - 0.01, bbox.min_lat]), json!({})),
            ],
        );

        let encoded = MvtEncoder::default().encode(tile, &[layer]).unwrap();
        assert!(encoded.is_empty());

        let center = json!([(bbox.min_lon + bbox.max_lon) / 2.0, (bbox.min_lat + bbox.max_lat) / 2.0]);
        let inside = Layer::new("taps", vec![feature(GeometryType::Point, center, json!({}))]);
        let encoded = MvtEncoder::new(4096).with_buffer(0).encode(tile, &[inside]).unwrap();
        assert_eq!(1, encoded.num_layers);
    }

    #[test]
    fn test_degenerate_layers_are_omitted() {
        let layer = Layer::new(
            "specks",
            vec![feature(
                GeometryType::LineString,
                json!([[85.3, 27.7], [85.3000001, 27.7000001]]),
                json!({}),
            )],
        );

        let encoded = MvtEncoder::default().encode(world(), &[layer]).unwrap();
        assert!(encoded.is_empty());
    }

    #[test]
    fn test_malformed_coordinates_fail() {
        for (geometry_type, coordinates) in [
            (GeometryType::Point, json!(["85.3", 27.7])),
            (GeometryType::Point, json!([85.3])),
            (GeometryType::LineString, json!([85.3, 27.7])),
            (GeometryType::Polygon, json!([[85.3, 27.7]])),
        ] {
            let layer = Layer::new("broken", vec![feature(geometry_type, coordinates, json!({}))]);
            match MvtEncoder::default().encode(world(), &[layer]) {
                Err(Error::Encoding(message)) => assert!(message.contains("broken"), "{}", message),
                other => panic!("unexpected result: {:?}", other),
            }
        }
    }
}
