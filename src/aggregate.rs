/// Concurrent per-collection queries assembled into layers
use crate::bbox::BoundingBox;
use crate::collection::CollectionSpec;
use crate::error::Error;
use crate::feature::{normalize, Feature, Layer};
use crate::generator::{FailureMode, GeneratorOptions};
use crate::query::{build_filter, build_query};
use crate::schema::inspect;
use crate::store::DocumentStore;

use futures::future::{join_all, try_join_all};
use tracing::{debug, warn};

/// Queries every collection concurrently and returns one layer per collection,
/// in the order the collections were given.
///
/// Layers without features are kept. In fail-fast mode the first failing
/// collection fails the whole call and the remaining queries are dropped; in
/// best-effort mode failing collections are logged and left out.
pub async fn aggregate(
    store: &dyn DocumentStore,
    bbox: &BoundingBox,
    collections: &[CollectionSpec],
    options: &GeneratorOptions,
) -> Result<Vec<Layer>, Error> {
    let pipelines = collections
        .iter()
        .map(|spec| collect_layer(store, bbox, spec, options.allow_unfiltered));

    match options.failure_mode {
        FailureMode::FailFast => try_join_all(pipelines).await,
        FailureMode::BestEffort => {
            let results = join_all(pipelines).await;
            Ok(results
                .into_iter()
                .zip(collections)
                .filter_map(|(result, spec)| match result {
                    Ok(layer) => Some(layer),
                    Err(e) => {
                        warn!(collection = %spec.name, error = %e, "omitting collection from tile");
                        None
                    }
                })
                .collect())
        }
    }
}

/// Runs the inspect, query and normalize pipeline for a single collection.
async fn collect_layer(
    store: &dyn DocumentStore,
    bbox: &BoundingBox,
    spec: &CollectionSpec,
    allow_unfiltered: bool,
) -> Result<Layer, Error> {
    let metadata = inspect(store, &spec.name, &spec.geometry_attribute).await?;
    match metadata.geometry_attribute.as_deref() {
        Some(attribute) if attribute != spec.geometry_attribute => warn!(
            collection = %spec.name,
            declared = %spec.geometry_attribute,
            discovered = attribute,
            "filtering on a different geometry attribute than the one features are read from"
        ),
        _ => {}
    }

    let spatial = build_filter(bbox, &metadata);
    if spatial.is_none() {
        if !allow_unfiltered {
            return Err(Error::NoGeometryAttribute(spec.name.clone()));
        }
        warn!(
            collection = %spec.name,
            limit = spec.effective_limit(),
            "no geometry attribute found, scanning without a spatial filter"
        );
    }

    let query = build_query(&spec.attribute_filter, spatial);
    let hits = store
        .search(&spec.name, &query, spec.effective_limit())
        .await?;
    debug!(collection = %spec.name, hits = hits.len(), "search complete");

    let features = hits
        .into_iter()
        .map(|hit| normalize(hit, &spec.name, &spec.geometry_attribute))
        .collect::<Result<Vec<Feature>, Error>>()?;

    Ok(Layer::new(spec.name.clone(), features))
}
