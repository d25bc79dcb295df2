//! Feed file access: streaming decompression, record framing, and
//! typed row decoding.
//!
//! A feed file is a compressed archive whose payload is a flat text
//! file: a fixed 512-byte container block, a comment-prefixed header
//! (column names plus tagged declarations), then data records framed by
//! a multi-byte record delimiter. [`FeedReader`] handles the byte-level
//! framing; [`FeedParser`] interprets the header and decodes records
//! into typed rows.

pub mod metadata;
pub mod parser;
pub mod reader;

pub use metadata::{ExportMode, FeedMetadata, Row};
pub use parser::FeedParser;
pub use reader::FeedReader;
