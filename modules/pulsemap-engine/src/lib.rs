pub mod cluster;
pub mod flow;
pub mod hexgrid;
pub mod hotspot;
pub mod pipeline;
pub mod tessellate;
pub mod text;

pub use cluster::{topic_id, ClusterOutcome, ClusterStats, Clusterer, TermVectorClusterer};
pub use flow::{label_overlap, FlowDetector, FlowReport, FlowStats, TopicsByCountry};
pub use hotspot::{confidence_component, prior_totals, HotspotAggregator, PriorTotals};
pub use pipeline::{Batch, BatchOutput, BatchReport, PulseEngine};
pub use tessellate::{
    cells_to_geojson, validate_cells, HexAggregator, HexMetadata, HexReport, HexValidationError,
};
