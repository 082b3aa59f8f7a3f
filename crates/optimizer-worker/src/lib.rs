//! Rate plan worker service: configuration and HTTP surface

pub mod api;
pub mod config;
pub mod request;
