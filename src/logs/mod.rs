//! Bounded log pipeline: many [`LogSink`] producers, one [`LogAggregator`].

mod aggregator;
mod sink;

pub use aggregator::LogAggregator;
pub use sink::{ChildStream, LogSink};
