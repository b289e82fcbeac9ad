// src/lib.rs
pub mod candidate_generation;
pub mod catalog;
pub mod clustering;
pub mod errors;
pub mod learning;
pub mod matching;
pub mod models;
pub mod normalization;
pub mod pipeline;
pub mod storage;
pub mod utils;
