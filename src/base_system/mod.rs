pub mod config;
pub mod context;
pub mod library_paths;
pub mod logging;
