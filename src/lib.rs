//! Advisor Connect: browse, filter, favorite and report on a directory of
//! financial advisors, with an admin console over a hosted backend.

pub mod admin;
pub mod advisor;
pub mod app;
pub mod auth;
pub mod backend;
pub mod config;
pub mod email;
pub mod error;
pub mod gateway;
pub mod lists;
pub mod reports;
pub mod settings;
