pub mod api_types;
pub mod client;
pub mod gateway;
pub mod types;
