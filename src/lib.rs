pub mod bot;
pub mod config;
pub mod daily;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod plan;
pub mod publication;
pub mod registry;
