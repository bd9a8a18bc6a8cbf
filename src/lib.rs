pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod dwarf2json;
pub mod error;
pub mod listing;
pub mod mirror;
pub mod output;
pub mod policy;
pub mod store;
