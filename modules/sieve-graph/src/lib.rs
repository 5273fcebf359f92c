pub mod entity_index;
pub mod similarity;
pub mod thread_detector;
pub mod thread_metrics;

pub use entity_index::EntityIndex;
pub use similarity::ArticleGraph;
pub use thread_detector::{ThreadDetectionStats, ThreadDetector};
