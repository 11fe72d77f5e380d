//! Immutable sorted tables.
//!
//! ```text
//! ┌─────────────────────┐
//! │ data block 0        │  each block: contents | type u8 | crc32
//! │ ...                 │
//! │ data block N        │
//! │ filter block        │  optional
//! │ properties block    │
//! │ index block         │  last key of each data block → handle
//! │ footer (60 bytes)   │
//! └─────────────────────┘
//! ```

pub mod block;
pub mod builder;
pub mod compression;
pub mod footer;
pub mod iterator;
pub mod reader;

pub use builder::{BuiltTable, SSTableBuilder, TableBuilderOptions};
pub use compression::CompressionType;
pub use iterator::SSTableIterator;
pub use reader::{SSTable, TableReadOptions};
