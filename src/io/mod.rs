//! File-facing stages: input discovery, decompression, the streaming reader
//! and the canonical writer.

pub mod compression;
pub mod glob;
pub mod reader;
pub mod writer;

pub use glob::discover_inputs;
pub use reader::{ReadReport, ReadReportHandle, RowStream, read_rows};
pub use writer::{write_aggregates, write_json};
