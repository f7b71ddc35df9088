pub mod engine;
pub mod loader;
pub mod metrics;
pub mod resolver;
pub mod runner;

pub use engine::BacktestEngine;
pub use loader::PolicyLoader;
pub use resolver::{resolve, ArchitectureRequest, Resolution};
pub use runner::run_episode;
