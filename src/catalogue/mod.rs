//! 目录模块：数据模型、文本解析、获取回退链与过滤视图。

pub mod models;
pub mod parser;
pub mod source;
pub mod view;

pub use models::{Availability, CatalogItem, Category, CategoryCounts, CoverImage, ParsedCatalogue};
pub use parser::CatalogueParser;
pub use source::{AcquireError, CatalogueSource, CatalogueStep};
pub use view::apply_filter;
