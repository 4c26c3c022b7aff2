//! Pipeline definition file.
//!
//! A pipeline TOML names its inputs as layers and then refers to those
//! layers by name from each stage section. Stages that produce output
//! register new layers (`output = "..."`) that later stages may use.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use hydro_map_feature_models::{Crs, JoinOptions};
use hydro_map_network_models::{FetchOptions, NavigationMode, NetworkConfig};
use hydro_map_render::{LayerStyle, MapStyle};
use hydro_map_source_models::{BoundarySource, ConfigError, PointSource};
use hydro_map_spatial::SpatialPredicate;
use serde::{Deserialize, Serialize};

/// Layer holding the distinct sites found by the network stage.
pub const NETWORK_SITES: &str = "network_sites";
/// Layer holding the distinct flowlines found by the network stage.
pub const NETWORK_FLOWLINES: &str = "network_flowlines";

#[derive(Debug, thiserror::Error)]
pub enum PipelineConfigError {
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid pipeline file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Source(#[from] ConfigError),

    #[error("Layer '{name}' is defined more than once")]
    DuplicateLayer { name: String },

    #[error("[{stage}] refers to unknown layer '{name}'")]
    UnknownLayer { stage: &'static str, name: String },
}

/// Top-level pipeline file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// CRS every layer is harmonized into after loading.
    pub target_crs: Crs,
    /// Directory relative output paths resolve against.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub points: Vec<PointSource>,
    #[serde(default)]
    pub boundaries: Vec<BoundarySource>,
    #[serde(default)]
    pub filter: Option<FilterStage>,
    #[serde(default)]
    pub join: Option<JoinStage>,
    #[serde(default)]
    pub nearest: Option<NearestStage>,
    #[serde(default)]
    pub network: Option<NetworkStage>,
    #[serde(default)]
    pub render: Option<RenderStage>,
    #[serde(default)]
    pub export: Option<ExportStage>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterStage {
    pub subject: String,
    pub boundary: String,
    #[serde(default)]
    pub predicate: SpatialPredicate,
    /// Layer of kept records; the complement goes to `<output>_outside`.
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStage {
    pub left: String,
    pub right: String,
    #[serde(default)]
    pub predicate: SpatialPredicate,
    #[serde(flatten)]
    pub options: JoinOptions,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearestStage {
    pub query: String,
    pub candidates: String,
    /// When set, every pair within this distance is joined instead of
    /// only the nearest candidate.
    #[serde(default)]
    pub max_distance: Option<f64>,
    pub output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStage {
    /// Point layer whose records start each navigation.
    pub origins: String,
    #[serde(default)]
    pub mode: NavigationMode,
    pub distance_km: f64,
    #[serde(flatten)]
    pub endpoints: NetworkConfig,
    #[serde(flatten)]
    pub fetch: FetchOptions,
    #[serde(default)]
    pub series: Option<SeriesStage>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeriesStage {
    pub parameter_code: String,
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub output: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderStage {
    pub output: PathBuf,
    #[serde(default)]
    pub map: MapStyle,
    /// Layers to draw; their order only matters within a geometry class.
    pub layers: Vec<RenderLayer>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderLayer {
    pub layer: String,
    #[serde(flatten)]
    pub style: LayerStyle,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportStage {
    pub path: PathBuf,
    /// Layers written to the container under their own names.
    #[serde(default)]
    pub layers: Vec<String>,
    #[serde(default)]
    pub grouped: Option<GroupedExport>,
}

/// A layer split into one container layer per attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupedExport {
    pub layer: String,
    pub attribute: String,
}

impl PipelineConfig {
    /// Reads and validates a pipeline file.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineConfigError`] if the file cannot be read, is not
    /// valid TOML for this schema, or refers to undefined layers.
    pub fn load(path: &Path) -> Result<Self, PipelineConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| PipelineConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolves an output path against `output_dir`.
    #[must_use]
    pub fn output_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.output_dir.join(path)
        }
    }

    /// Checks source definitions and that every stage only refers to
    /// layers defined before it runs.
    ///
    /// # Errors
    ///
    /// Returns the first problem found.
    pub fn validate(&self) -> Result<(), PipelineConfigError> {
        let mut layers = BTreeSet::new();

        for source in &self.points {
            source.validate()?;
            define(&mut layers, &source.name)?;
        }
        for source in &self.boundaries {
            define(&mut layers, &source.name)?;
        }

        if let Some(filter) = &self.filter {
            require(&layers, "filter", &filter.subject)?;
            require(&layers, "filter", &filter.boundary)?;
            define(&mut layers, &filter.output)?;
            define(&mut layers, &format!("{}_outside", filter.output))?;
        }
        if let Some(join) = &self.join {
            require(&layers, "join", &join.left)?;
            require(&layers, "join", &join.right)?;
            define(&mut layers, &join.output)?;
        }
        if let Some(network) = &self.network {
            require(&layers, "network", &network.origins)?;
            define(&mut layers, NETWORK_SITES)?;
            define(&mut layers, NETWORK_FLOWLINES)?;
        }
        // nearest runs after the network stage so it can use its sites
        if let Some(nearest) = &self.nearest {
            require(&layers, "nearest", &nearest.query)?;
            require(&layers, "nearest", &nearest.candidates)?;
            define(&mut layers, &nearest.output)?;
        }
        if let Some(render) = &self.render {
            for layer in &render.layers {
                require(&layers, "render", &layer.layer)?;
            }
        }
        if let Some(export) = &self.export {
            for layer in &export.layers {
                require(&layers, "export", layer)?;
            }
            if let Some(grouped) = &export.grouped {
                require(&layers, "export", &grouped.layer)?;
            }
        }

        Ok(())
    }
}

fn define(layers: &mut BTreeSet<String>, name: &str) -> Result<(), PipelineConfigError> {
    if layers.insert(name.to_string()) {
        Ok(())
    } else {
        Err(PipelineConfigError::DuplicateLayer {
            name: name.to_string(),
        })
    }
}

fn require(
    layers: &BTreeSet<String>,
    stage: &'static str,
    name: &str,
) -> Result<(), PipelineConfigError> {
    if layers.contains(name) {
        Ok(())
    } else {
        Err(PipelineConfigError::UnknownLayer {
            stage,
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_map_feature_models::{Cardinality, JoinKind};
    use hydro_map_render::MarkerShape;

    const PIPELINE: &str = r##"
        target_crs = "EPSG:5070"
        output_dir = "out"

        [[points]]
        name = "stations"
        files = ["data/va_stations.csv", "data/md_stations.csv"]
        id_column = "site_no"
        x_column = "dec_long_va"
        y_column = "dec_lat_va"
        crs = "EPSG:4269"
        source_column = "state"

        [[boundaries]]
        name = "counties"
        path = "data/counties.geojson"
        id_field = "GEOID"

        [join]
        left = "stations"
        right = "counties"
        kind = "left"
        cardinality = "one_to_one"
        output = "stations_by_county"

        [network]
        origins = "stations"
        mode = "UT"
        distance_km = 25.0
        concurrency = 2

        [network.series]
        parameter_code = "00060"
        start = "2024-06-01"
        output = "discharge.csv"

        [nearest]
        query = "stations"
        candidates = "network_sites"
        max_distance = 5000.0
        output = "sites_near_stations"

        [render]
        output = "map.png"
        map = { dpi = 100 }

        [[render.layers]]
        layer = "counties"
        fill = "#f0f0f0"

        [[render.layers]]
        layer = "stations"
        marker = "square"

        [export]
        path = "layers.duckdb"
        layers = ["counties"]
        grouped = { layer = "stations_by_county", attribute = "NAME" }
    "##;

    #[test]
    fn parses_full_pipeline() {
        let config: PipelineConfig = toml::from_str(PIPELINE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.target_crs, Crs::Epsg(5070));
        assert_eq!(config.points[0].files.len(), 2);
        assert_eq!(config.points[0].table.crs, Crs::Epsg(4269));
        assert_eq!(config.boundaries[0].options.id_field.as_deref(), Some("GEOID"));

        let join = config.join.as_ref().unwrap();
        assert_eq!(join.predicate, SpatialPredicate::Within);
        assert_eq!(join.options.kind, JoinKind::Left);
        assert_eq!(join.options.cardinality, Cardinality::OneToOne);

        let network = config.network.as_ref().unwrap();
        assert_eq!(network.mode, NavigationMode::UpstreamTributaries);
        assert_eq!(network.fetch.concurrency, 2);
        assert_eq!(network.fetch.timeout_ms, FetchOptions::default().timeout_ms);
        assert_eq!(network.endpoints, NetworkConfig::default());
        assert_eq!(
            network.series.as_ref().unwrap().start,
            NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
        );

        let render = config.render.as_ref().unwrap();
        assert_eq!(render.map.dpi, 100);
        assert_eq!(render.layers[1].style.marker, MarkerShape::Square);

        assert_eq!(
            config.output_path(Path::new("map.png")),
            PathBuf::from("out/map.png")
        );
    }

    #[test]
    fn rejects_unknown_layer_reference() {
        let text = PIPELINE.replace("right = \"counties\"", "right = \"states\"");
        let config: PipelineConfig = toml::from_str(&text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(PipelineConfigError::UnknownLayer { stage: "join", name }) if name == "states"
        ));
    }

    #[test]
    fn rejects_duplicate_layer_names() {
        let text = PIPELINE.replace("output = \"stations_by_county\"", "output = \"counties\"");
        let config: PipelineConfig = toml::from_str(&text).unwrap();
        assert!(matches!(
            config.validate(),
            Err(PipelineConfigError::DuplicateLayer { name }) if name == "counties"
        ));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = std::env::temp_dir().join("hydro_map_cli_missing/pipeline.toml");
        assert!(matches!(
            PipelineConfig::load(&path),
            Err(PipelineConfigError::Read { .. })
        ));
    }
}
