//! Repository pattern implementation for data access
//!
//! This module provides a clean abstraction layer over the database,
//! implementing the Repository pattern to separate business logic from
//! data access concerns.

pub mod route;
pub mod statistics;
pub mod traits;

pub use route::RouteRepository;
pub use statistics::StatisticsRepository;
pub use traits::Repository;
