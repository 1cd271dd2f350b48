pub mod capture;
pub mod config;
pub mod container;
pub mod encoder;
pub mod error;
pub mod pipeline;
pub mod service;
pub mod transport;
pub mod utils;
