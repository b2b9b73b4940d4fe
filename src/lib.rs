pub mod dataset;
pub mod dto;
pub mod enrich;
pub mod error;
pub mod files;
pub mod identity;
pub mod pipeline;
pub mod response;
pub mod scrape;
pub mod store;
pub mod util;
