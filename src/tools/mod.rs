//! Tool System - catalog aggregation and call routing

mod catalog;
mod router;

pub use catalog::{ToolCatalog, ToolDescriptor};
pub use router::{CatalogRouter, ToolRouter};
