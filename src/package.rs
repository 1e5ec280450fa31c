/// Assembly and compression of the final tile payload
use crate::bbox::TileCoordinate;
use crate::encode::TileEncoder;
use crate::error::Error;
use crate::feature::Layer;

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

/// gzip level used unless configured otherwise.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Encodes the non-empty layers into a tile and gzips it.
///
/// Returns `None` when no layer has features (or nothing survived
/// encoding): an empty tile should not be emitted at all.
pub fn package(
    tile: TileCoordinate,
    layers: Vec<Layer>,
    encoder: &dyn TileEncoder,
    compression_level: u32,
) -> Result<Option<Vec<u8>>, Error> {
    let layers: Vec<Layer> = layers.into_iter().filter(|l| !l.is_empty()).collect();
    if layers.is_empty() {
        debug!(%tile, "no features in any layer");
        return Ok(None);
    }

    let encoded = encoder.encode(tile, &layers)?;
    if encoded.is_empty() {
        debug!(%tile, "encoded tile is empty");
        return Ok(None);
    }

    let compressed = compress(&encoded.bytes, compression_level)?;
    debug!(
        %tile,
        layers = encoded.num_layers,
        raw = encoded.bytes.len(),
        compressed = compressed.len(),
        "packaged tile"
    );

    Ok(Some(compressed))
}

/// gzip-compresses a buffer. Levels above 9 are clamped to 9.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>, Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::new(level.min(9)));
    encoder.write_all(data)?;

    Ok(encoder.finish()?)
}
