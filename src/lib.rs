pub mod activity;
pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod masking;
pub mod model;
pub mod observability;
pub mod security;
pub mod sink;
