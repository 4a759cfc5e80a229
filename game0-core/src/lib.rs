pub mod buffer;
pub mod chat;
pub mod config;
pub mod document;
pub mod error;
pub mod extract;
pub mod generation;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod preview;
pub mod prompt;
pub mod puzzle;
pub mod stream;
pub mod telemetry;
pub mod viewer;

pub use error::{CoreResult, Game0Error};
