pub mod config;
pub mod context;
pub mod link_extractor;
pub mod logging;
pub mod user_quota;
