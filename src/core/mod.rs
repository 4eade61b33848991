pub mod etl;
pub mod parser;
pub mod pipeline;

pub use crate::domain::model::{MergeBatch, MergeReport, SourceBatch};
pub use crate::domain::ports::{ConfigProvider, Pipeline, SourceFetcher, ThreatStore};
pub use crate::utils::error::Result;
