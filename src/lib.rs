pub mod config;
pub mod crawler;
pub mod data_models;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod history;
pub mod inference;
pub mod pipeline;
pub mod router;
pub mod search;
pub mod splitter;
