pub mod cache;
pub mod mapper;
pub mod query;

pub use cache::{MetadataCache, TtlCache};
pub use mapper::{map_services, MappingScope, MappingSummary, MetadataMapper};
pub use query::{get_metadata_map_bundle_on_all_nodes, get_metadata_map_bundle_on_node, MetadataMapStats};
