pub mod batch;
pub mod chunk;
pub mod config;
pub mod domain;
pub mod error;
pub mod eutils;
pub mod harvest;
pub mod input;
pub mod output;
pub mod parser;
pub mod schedule;
pub mod stitch;
pub mod terms;
