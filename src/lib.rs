pub mod agent;
pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod log;
pub mod orchestration;
pub mod report;
pub mod run;
pub mod util;

pub use error::{Error, Result};
