pub mod acquisition;
pub mod config;
pub mod dedup;
pub mod extractor;
pub mod reader;
pub mod record;
pub mod store;
pub mod utils;
