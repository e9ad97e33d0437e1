pub mod api;
pub mod config;
pub mod error;
pub mod history;
pub mod state;
pub mod store;
pub mod types;
pub mod util;

#[cfg(test)]
mod test_support;
