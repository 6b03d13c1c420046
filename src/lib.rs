//! PhishScope engine: scores URLs for phishing likelihood from a fixed set of
//! lexical, network and page-content features.

pub mod config;
pub mod engine;
pub mod error;
pub mod explain;
pub mod features;
pub mod labels;
pub mod models;
pub mod redis_client;
pub mod routes;
pub mod scaler;
pub mod types;
pub mod url_parts;
