//! # Bulwark Shared
//!
//! Wire types shared by the HTTP surface and its clients.

pub mod dto;
pub mod response;

pub use response::{ApiResponse, ErrorResponse};
