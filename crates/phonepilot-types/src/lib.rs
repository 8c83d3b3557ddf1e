//! Core types for the PhonePilot device console.
//!
//! This crate contains the data model and wire formats shared by the
//! transport layer and the console core. It performs no I/O apart from
//! loading the configuration file.

pub mod api;
pub mod config;
pub mod device;
pub mod display;
pub mod event;
pub mod message;
