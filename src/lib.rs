//! Attendify recognition pipeline
//!
//! Accepts a class photo, returns a job handle immediately, and in the
//! background matches every detected face against the known-student index,
//! records attendance, and publishes per-face results for polling clients.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
