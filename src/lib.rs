pub mod api;
pub mod concurrent_fetcher;
pub mod database;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod spreadsheet;
pub mod validator;
