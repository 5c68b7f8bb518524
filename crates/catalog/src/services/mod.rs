pub mod catalog_service;

pub use catalog_service::{suggested_filename, AreaReport, CatalogService, ImageReport, PruneReport};
