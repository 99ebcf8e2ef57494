//! SeaORM entities for the rate limiter tables.

pub mod rate_limit_config;
pub mod rate_limit_counter;
pub mod rate_limit_event;
