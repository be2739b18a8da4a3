// src/lib.rs
pub mod error;

pub mod data {
    pub mod config;
    pub mod store;
    pub mod directory;
    pub mod dataset;
}

pub mod pipeline {
    pub mod scaler;
    pub mod classifier;
    pub mod worker;
    pub mod aggregator;
    pub mod objects;
    pub mod orderer;
    pub mod cache;
}

pub mod engine;
