// Logs module - Output capture and batched log delivery

mod batcher;
mod lines;

pub use batcher::LogBatcher;
pub use lines::{read_capped_line, CappedLine, DEFAULT_MAX_LINE_BYTES};
