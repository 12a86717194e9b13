//! # Task Manager
//!
//! Task tracking service built with Axum, SQLx, and Tokio that notifies a
//! per-task webhook shortly before the task's due date.
pub mod api;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod notifier;
pub mod scheduler;
pub mod service;
