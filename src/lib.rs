pub mod analytics;
pub mod api;
pub mod click_repo;
pub mod config;
mod orm;
pub mod redirect_service;
pub mod short_code;
pub mod url_repo;
pub mod url_service;
