//! # Bulwark Core
//!
//! The domain layer of the Bulwark rate-limiting engine.
//! This crate contains the admission rules, the ports that counter stores and
//! repositories implement, and the services that tie them together. It has
//! zero infrastructure dependencies.

pub mod domain;
pub mod error;
pub mod ports;
pub mod services;

pub use error::{RateLimitError, RepoError, StoreError};
pub use services::{ConfigProvider, EventRecorder, ResilientCoordinator};
