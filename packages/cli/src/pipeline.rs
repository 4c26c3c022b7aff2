//! Runs every configured stage in order.
//!
//! Layers live in a name-keyed map. Sources are loaded and harmonized
//! into the target CRS first, then each stage reads its inputs from the
//! map and registers its outputs under the configured names. Per-record,
//! per-origin and per-layer failures are collected in the [`RunSummary`]
//! while the run continues.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use hydro_map_crs::{CrsError, harmonize};
use hydro_map_export::{ExportError, LayerFailure, LayerGroup, export_layers, group_by};
use hydro_map_feature_models::{Crs, FeatureCollection, RecordFailure};
use hydro_map_network::{
    FetchError, FetchFailure, NetworkIndex, ProgressCallback, fetch_daily_values, fetch_traversals,
};
use hydro_map_network_models::NavigationRequest;
use hydro_map_render::{Layer, RenderError, render_to_file};
use hydro_map_series::{SeriesError, normalize, write_csv};
use hydro_map_source::{SourceError, load_boundary_source, load_point_source};
use hydro_map_spatial::{
    SpatialError, filter_contained, filter_not_contained, join, nearest_join, within_distance,
};

use crate::config::{NETWORK_FLOWLINES, NETWORK_SITES, NetworkStage, PipelineConfig};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Crs(#[from] CrsError),

    #[error(transparent)]
    Spatial(#[from] SpatialError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Layer '{0}' is not available at this stage")]
    MissingLayer(String),
}

/// What a run produced and what it skipped.
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Feature count of every layer at the end of the run.
    pub layers: BTreeMap<String, usize>,
    pub record_failures: Vec<RecordFailure>,
    pub fetch_failures: Vec<FetchFailure>,
    pub export_failures: Vec<LayerFailure>,
    pub series_rows: usize,
    pub outputs: Vec<PathBuf>,
}

impl RunSummary {
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.record_failures.len() + self.fetch_failures.len() + self.export_failures.len()
    }
}

type Layers = BTreeMap<String, FeatureCollection>;

fn layer<'a>(layers: &'a Layers, name: &str) -> Result<&'a FeatureCollection, PipelineError> {
    layers
        .get(name)
        .ok_or_else(|| PipelineError::MissingLayer(name.to_string()))
}

fn record_failures(summary: &mut RunSummary, stage: &str, failures: Vec<RecordFailure>) {
    for failure in &failures {
        log::warn!("[{stage}] skipped {failure}");
    }
    summary.record_failures.extend(failures);
}

/// Number of progress steps a run of `config` takes.
#[must_use]
pub fn step_count(config: &PipelineConfig) -> u64 {
    let optional = [
        config.filter.is_some(),
        config.join.is_some(),
        config.network.is_some(),
        config.nearest.is_some(),
        config.render.is_some(),
        config.export.is_some(),
    ];
    2 + optional.iter().filter(|enabled| **enabled).count() as u64
}

/// Runs the pipeline described by `config`.
///
/// `steps` advances once per stage; `fetch` tracks origins of the
/// network stage.
///
/// # Errors
///
/// Returns the first structural error. Per-record, per-origin and
/// per-layer failures do not stop the run; they are in the summary.
#[allow(clippy::too_many_lines)]
pub async fn run<I>(
    config: &PipelineConfig,
    index: &I,
    steps: &Arc<dyn ProgressCallback>,
    fetch: &Arc<dyn ProgressCallback>,
) -> Result<RunSummary, PipelineError>
where
    I: NetworkIndex + ?Sized,
{
    let start = Instant::now();
    let target = &config.target_crs;
    let mut summary = RunSummary::default();
    let mut layers = Layers::new();

    steps.set_total(step_count(config));

    // --- Load ---
    steps.set_message("Loading sources".to_string());
    for source in &config.points {
        layers.insert(source.name.clone(), load_point_source(source)?);
    }
    for source in &config.boundaries {
        layers.insert(source.name.clone(), load_boundary_source(source)?);
    }
    steps.inc(1);

    // --- Harmonize ---
    steps.set_message(format!("Harmonizing to {target}"));
    for (name, collection) in std::mem::take(&mut layers) {
        layers.insert(name, harmonize(collection, target)?);
    }
    steps.inc(1);

    // --- Filter ---
    if let Some(stage) = &config.filter {
        steps.set_message("Filtering".to_string());
        let subject = layer(&layers, &stage.subject)?;
        let boundary = layer(&layers, &stage.boundary)?;

        let inside = filter_contained(subject, boundary, stage.predicate)?;
        let outside = filter_not_contained(subject, boundary, stage.predicate)?;
        log::info!(
            "Filter: {} of {} '{}' records inside '{}', {} outside",
            inside.collection.len(),
            subject.len(),
            stage.subject,
            stage.boundary,
            outside.collection.len()
        );

        // both passes see the same invalid records
        record_failures(&mut summary, "filter", inside.failures);
        layers.insert(stage.output.clone(), inside.collection);
        layers.insert(format!("{}_outside", stage.output), outside.collection);
        steps.inc(1);
    }

    // --- Join ---
    if let Some(stage) = &config.join {
        steps.set_message("Joining".to_string());
        let result = join(
            layer(&layers, &stage.left)?,
            layer(&layers, &stage.right)?,
            stage.predicate,
            stage.options,
        )?;
        log::info!(
            "Join: {} rows from '{}' x '{}'",
            result.len(),
            stage.left,
            stage.right
        );

        record_failures(&mut summary, "join", result.failures);
        layers.insert(stage.output.clone(), result.collection);
        steps.inc(1);
    }

    // --- Network ---
    if let Some(stage) = &config.network {
        steps.set_message("Navigating river network".to_string());
        let rows = run_network(config, stage, index, &mut layers, &mut summary, fetch).await?;
        summary.series_rows = rows;
        steps.inc(1);
    }

    // --- Nearest ---
    if let Some(stage) = &config.nearest {
        steps.set_message("Resolving nearest features".to_string());
        let query = layer(&layers, &stage.query)?;
        let candidates = layer(&layers, &stage.candidates)?;

        let result = match stage.max_distance {
            Some(max) => within_distance(query, candidates, max)?,
            None => nearest_join(query, candidates)?,
        };
        log::info!(
            "Nearest: {} rows for {} '{}' records",
            result.len(),
            query.len(),
            stage.query
        );

        record_failures(&mut summary, "nearest", result.failures);
        layers.insert(stage.output.clone(), result.collection);
        steps.inc(1);
    }

    // --- Render ---
    if let Some(stage) = &config.render {
        steps.set_message("Rendering map".to_string());
        let map_layers = stage
            .layers
            .iter()
            .map(|l| -> Result<_, PipelineError> {
                Ok(Layer::new(&l.layer, layer(&layers, &l.layer)?, l.style.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let path = config.output_path(&stage.output);
        render_to_file(&map_layers, &stage.map, &path)?;
        summary.outputs.push(path);
        steps.inc(1);
    }

    // --- Export ---
    if let Some(stage) = &config.export {
        steps.set_message("Exporting layers".to_string());
        let mut groups = stage
            .layers
            .iter()
            .map(|name| -> Result<_, PipelineError> {
                Ok(LayerGroup::new(name, layer(&layers, name)?.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(grouped) = &stage.grouped {
            groups.extend(group_by(layer(&layers, &grouped.layer)?, &grouped.attribute));
        }

        let path = config.output_path(&stage.path);
        let report = export_layers(&groups, &path)?;
        summary.export_failures = report.failures;
        summary.outputs.push(path);
        steps.inc(1);
    }

    summary.layers = layers.iter().map(|(k, v)| (k.clone(), v.len())).collect();

    steps.finish(format!(
        "Pipeline finished in {:.1}s",
        start.elapsed().as_secs_f64()
    ));

    Ok(summary)
}

/// Navigates from every origin, registers the merged sites and flowlines,
/// and optionally fetches and normalizes their daily series.
///
/// Returns the number of normalized series rows written.
async fn run_network<I>(
    config: &PipelineConfig,
    stage: &NetworkStage,
    index: &I,
    layers: &mut Layers,
    summary: &mut RunSummary,
    progress: &Arc<dyn ProgressCallback>,
) -> Result<usize, PipelineError>
where
    I: NetworkIndex + ?Sized,
{
    let origins = harmonize(layer(layers, &stage.origins)?.clone(), &Crs::WGS84)?;
    let request = NavigationRequest::new(stage.mode, stage.distance_km);

    let batch = fetch_traversals(index, &origins, &request, &stage.fetch, progress).await?;
    let sites = batch.sites();
    let flowlines = batch.flowlines();
    log::info!(
        "Network: {} distinct sites and {} flowlines from {} origins",
        sites.len(),
        flowlines.len(),
        origins.len()
    );

    let site_ids = sites.iter().map(|s| s.id.clone()).collect::<Vec<_>>();
    summary.fetch_failures = batch.failures;

    layers.insert(NETWORK_SITES.to_string(), harmonize(sites, &config.target_crs)?);
    layers.insert(
        NETWORK_FLOWLINES.to_string(),
        harmonize(flowlines, &config.target_crs)?,
    );

    let Some(series) = &stage.series else {
        return Ok(0);
    };

    let records = fetch_daily_values(
        index,
        &site_ids,
        &series.parameter_code,
        series.start,
        series.end,
    )
    .await?;
    let rows = normalize(&records);

    let path = config.output_path(&series.output);
    write_csv(&rows, &path)?;
    log::info!(
        "Series: {} records normalized to {} rows in {}",
        records.len(),
        rows.len(),
        path.display()
    );
    summary.outputs.push(path);

    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::NaiveDate;
    use geo::{Coord, line_string, point};
    use hydro_map_feature_models::Feature;
    use hydro_map_network::null_progress;
    use hydro_map_network_models::Traversal;
    use hydro_map_series_models::TimeSeriesRecord;

    use super::*;

    /// Answers every origin with the same two sites.
    struct FakeIndex;

    #[async_trait]
    impl NetworkIndex for FakeIndex {
        async fn navigate(
            &self,
            origin: Coord<f64>,
            _request: &NavigationRequest,
        ) -> Result<Traversal, FetchError> {
            if origin.x > 0.0 {
                return Err(FetchError::OriginNotFound);
            }
            Ok(Traversal {
                comid: "4512772".to_string(),
                sites: FeatureCollection::with_features(
                    Crs::WGS84,
                    vec![
                        Feature::new("01646500", point!(x: -77.127, y: 38.949)),
                        Feature::new("01594440", point!(x: -76.693, y: 38.955)),
                    ],
                ),
                flowlines: FeatureCollection::with_features(
                    Crs::WGS84,
                    vec![Feature::new(
                        "4512772",
                        line_string![(x: -77.12, y: 38.95), (x: -77.13, y: 38.96)],
                    )],
                ),
            })
        }

        async fn daily_values(
            &self,
            sites: &[String],
            parameter_code: &str,
            start: NaiveDate,
            _end: Option<NaiveDate>,
        ) -> Result<Vec<TimeSeriesRecord>, FetchError> {
            let later = start + chrono::Days::new(2);
            Ok(sites
                .iter()
                .flat_map(|site| {
                    [
                        TimeSeriesRecord::new(site, start, parameter_code, Some(4210.0)),
                        TimeSeriesRecord::new(site, later, parameter_code, Some(3980.0)),
                    ]
                })
                .collect())
        }
    }

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("hydro_map_cli_{name}"));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config(dir: &Path, body: &str) -> PipelineConfig {
        let text = format!(
            "output_dir = \"{}\"\n{body}",
            dir.join("out").display().to_string().replace('\\', "/")
        );
        let config: PipelineConfig = toml::from_str(&text).unwrap();
        config.validate().unwrap();
        config
    }

    fn path_str(path: &Path) -> String {
        path.display().to_string().replace('\\', "/")
    }

    #[tokio::test]
    async fn runs_spatial_stages_end_to_end() {
        let dir = scratch("spatial");
        let stations = dir.join("stations.csv");
        let gages = dir.join("gages.csv");
        let counties = dir.join("counties.geojson");

        std::fs::write(&stations, "site_no,x,y,kind\nA,5,5,gage\nB,25,5,gage\nC,15,5,well\n")
            .unwrap();
        std::fs::write(&gages, "gage_id,gx,gy\nG1,6,5\nG2,40,5\n").unwrap();
        std::fs::write(
            &counties,
            r#"{"type": "FeatureCollection", "features": [
                {"type": "Feature", "properties": {"name": "P1"},
                 "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
                {"type": "Feature", "properties": {"name": "P2"},
                 "geometry": {"type": "Polygon", "coordinates": [[[20,0],[30,0],[30,10],[20,10],[20,0]]]}}
            ]}"#,
        )
        .unwrap();

        let config = config(
            &dir,
            &format!(
                r##"
                target_crs = "EPSG:5070"

                [[points]]
                name = "stations"
                files = ["{stations}"]
                id_column = "site_no"
                x_column = "x"
                y_column = "y"
                crs = "EPSG:5070"

                [[points]]
                name = "gages"
                files = ["{gages}"]
                id_column = "gage_id"
                x_column = "gx"
                y_column = "gy"
                crs = "EPSG:5070"

                [[boundaries]]
                name = "counties"
                path = "{counties}"
                id_field = "name"
                crs = "EPSG:5070"

                [filter]
                subject = "stations"
                boundary = "counties"
                output = "stations_inside"

                [join]
                left = "stations"
                right = "counties"
                output = "stations_by_county"

                [nearest]
                query = "stations"
                candidates = "gages"
                output = "nearest_gage"

                [render]
                output = "map.png"
                map = {{ width_in = 2.0, height_in = 1.0, dpi = 50 }}

                [[render.layers]]
                layer = "counties"

                [[render.layers]]
                layer = "stations"
                fill = "#e34a33"

                [export]
                path = "layers.duckdb"
                layers = ["counties"]
                grouped = {{ layer = "stations_by_county", attribute = "name" }}
                "##,
                stations = path_str(&stations),
                gages = path_str(&gages),
                counties = path_str(&counties),
            ),
        );

        let progress = null_progress();
        let summary = run(&config, &FakeIndex, &progress, &progress).await.unwrap();

        assert_eq!(summary.layers["stations_by_county"], 2);
        assert_eq!(summary.layers["stations_inside"], 2);
        assert_eq!(summary.layers["stations_inside_outside"], 1);
        assert_eq!(summary.layers["nearest_gage"], 3);
        assert_eq!(summary.failure_count(), 0);

        let map = dir.join("out/map.png");
        assert!(map.exists());

        let layers = hydro_map_export::list_layers(&dir.join("out/layers.duckdb")).unwrap();
        let names: Vec<_> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["P1", "P2", "counties"]);
    }

    #[tokio::test]
    async fn network_stage_collects_sites_and_series() {
        let dir = scratch("network");
        let origins = dir.join("origins.csv");
        std::fs::write(
            &origins,
            "id,lon,lat\nlittle_falls,-77.1276,38.9498\nnowhere,10.0,10.0\n",
        )
        .unwrap();

        let config = config(
            &dir,
            &format!(
                r#"
                target_crs = "EPSG:4326"

                [[points]]
                name = "origins"
                files = ["{origins}"]
                id_column = "id"
                x_column = "lon"
                y_column = "lat"
                crs = "EPSG:4326"

                [network]
                origins = "origins"
                mode = "UM"
                distance_km = 10.0

                [network.series]
                parameter_code = "00060"
                start = "2024-06-01"
                output = "discharge.csv"
                "#,
                origins = path_str(&origins),
            ),
        );

        let progress = null_progress();
        let summary = run(&config, &FakeIndex, &progress, &progress).await.unwrap();

        assert_eq!(summary.layers[NETWORK_SITES], 2);
        assert_eq!(summary.layers[NETWORK_FLOWLINES], 1);
        assert_eq!(summary.fetch_failures.len(), 1);
        assert_eq!(summary.fetch_failures[0].origin_id, "nowhere");
        // two sites, days 1..=3 each
        assert_eq!(summary.series_rows, 6);

        let csv = std::fs::read_to_string(dir.join("out/discharge.csv")).unwrap();
        assert_eq!(csv.lines().count(), 7);
    }
}
