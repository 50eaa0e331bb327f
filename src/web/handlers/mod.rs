//! HTTP request handlers organized by resource

pub mod cache;
pub mod health;
pub mod images;
pub mod render;
