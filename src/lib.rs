pub mod cache;
pub mod calendar;
pub mod collection;
pub mod config;
pub mod models;
pub mod scraping;
pub mod utils;

pub use cache::{HttpCache, HttpTransport, OfflineTransport, Request};
pub use config::AppConfig;
pub use models::{Show, Showtime};
