pub mod cache;
pub mod config;
pub mod dataset;
pub mod harness;
pub mod index;
pub mod profiler;
pub mod report;
pub mod stats;
pub mod vector;
