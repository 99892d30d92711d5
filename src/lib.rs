pub mod aggregate;
pub mod analysis;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod explorer;
pub mod grades;
pub mod loader;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod present;
pub mod trend;
pub mod utils;
