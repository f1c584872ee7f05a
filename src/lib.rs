//! Core library of the hierarchical graph-clustering engine

pub mod config;
pub mod error;
pub mod graph;
pub mod cluster;
pub mod hierarchy;
pub mod hig;
pub mod output;
pub mod types;

pub use anyhow::{anyhow, Result};

pub use cluster::cluster;
pub use config::ClusterOptions;
pub use graph::{Graph, InputLink};
pub use hierarchy::Hierarchy;
