pub mod compactor;
pub mod config;
pub mod engine;
pub mod filters;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod pricing;
pub mod validation;
pub mod wal;
