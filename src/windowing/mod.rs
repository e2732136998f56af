//! Sliding-window segmentation of long queries and merging of the
//! overlapping per-segment model outputs.

pub mod aggregator;
pub mod batch;
pub mod margin;
pub mod segmenter;

pub use aggregator::{aggregate, AggregatedQuery, Contribution};
pub use batch::{run_batches, Framing, SegmentOutput, SegmentRequest};
pub use margin::{mask, unmasked_range};
pub use segmenter::segment;
