pub mod commands;

pub use commands::{parse_sort, App, FindReport};
