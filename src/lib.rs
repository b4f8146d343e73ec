pub mod config;
pub mod git;
pub mod hook;
pub mod sync;
pub mod template;
pub mod utils;
