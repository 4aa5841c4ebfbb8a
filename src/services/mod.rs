//! Business logic services
//!
//! Services own validation and invariant enforcement; repositories below
//! them only move data. Handlers above them stay thin.

pub mod link;
pub mod playback;
pub mod retention;
pub mod route;
pub mod scoring;
pub mod selection;
pub mod statistics;

pub use link::{HttpLinkResolver, LinkResolver};
pub use playback::PlaybackService;
pub use retention::RetentionSweeper;
pub use route::RouteService;
pub use scoring::ScoringService;
pub use selection::RouteSelector;
pub use statistics::StatisticsService;
