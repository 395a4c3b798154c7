pub mod config;
pub mod error;
pub mod geo;
pub mod types;

#[cfg(feature = "test-utils")]
pub mod testutil;

pub use config::{
    load_config, parse_time_window, ClusteringConfig, EngineConfig, FlowConfig, HexConfig,
    HotspotConfig, IntensityWeights, SimilarityStrategy, SmoothingConfig, MAX_RESOLUTION_CEILING,
    MAX_SMOOTHING_RADIUS,
};
pub use error::{ConfigError, GeometryError, SignalRejection};
pub use geo::{parse_country_geojson, BoundingBox, Coord, CountryGeometry, GeometryTable, Polygon};
pub use types::*;
