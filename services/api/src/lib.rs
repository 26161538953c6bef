//! services/api/src/lib.rs
//!
//! Library root for the AnamnesIA API service.

pub mod adapters;
pub mod audit;
pub mod config;
pub mod error;
pub mod web;
