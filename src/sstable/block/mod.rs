pub mod builder;
pub mod reader;

pub use builder::{BlockBuilder, DEFAULT_RESTART_INTERVAL};
pub use reader::{Block, BlockIterator};
