// src/catalog/mod.rs
pub mod master_products;
pub mod quality;

pub use master_products::{build_master_products, master_id, CatalogBuild};
pub use quality::{build_quality_report, confidence_histogram, ReportInputs};
