//! Rollcall - Attendance capture with time-limited class session tokens
//!
//! This library provides token issuing, scan verification, schedule
//! expansion and attendance statistics behind a JSON API.

pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
