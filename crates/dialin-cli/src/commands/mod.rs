pub mod bag;
pub mod brew;
pub mod common;
pub mod completions;
pub mod export;
pub mod status;
pub mod sync;
