pub mod cache;
pub mod config;
pub mod models;
pub mod server;
pub mod upstream;
pub mod utils;

#[cfg(test)]
mod test_utils;
