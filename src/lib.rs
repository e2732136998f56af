pub mod config;
pub mod error;
pub mod labels;
mod model;
pub mod pipeline;
pub mod postprocess;
pub mod types;
pub mod windowing;

pub use config::{PunctuatorConfig, RestoreConfig};
pub use error::RestoreError;
pub use labels::{Capitalization, Label, LabelSet};
pub use pipeline::builder::PunctuatorBuilder;
pub use pipeline::defaults::{HfTokenizer, WhitespaceTokenizer};
pub use pipeline::runtime::{predict_labels, Punctuator};
pub use pipeline::traits::{TokenClassifier, Tokenizer};
pub use types::{Margin, ProbabilityVector, Segment, TokenizedQuery};
pub use windowing::{AggregatedQuery, Framing};
