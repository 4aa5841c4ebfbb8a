//! Weighted and performance-based route selection
//!
//! Both algorithms are a single O(n) walk over the candidate list and hold
//! no selection state between calls; the random source is injected per call
//! so a seeded `fastrand::Rng` makes any selection reproducible.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::DownloadRoute,
    repositories::{traits::Repository, RouteRepository},
    services::ScoringService,
};

pub struct RouteSelector {
    routes: RouteRepository,
    scoring: Arc<ScoringService>,
}

impl RouteSelector {
    pub fn new(routes: RouteRepository, scoring: Arc<ScoringService>) -> Self {
        Self { routes, scoring }
    }

    /// Pick a route with probability proportional to its configured weight
    ///
    /// `Ok(None)` means no route is available; callers must handle it.
    pub async fn select_by_weight(
        &self,
        rng: &mut fastrand::Rng,
    ) -> Result<Option<DownloadRoute>, AppError> {
        let routes = self.routes.find_all().await?;
        let selected = pick_by_weight(&routes, rng);

        if let Some(route) = &selected {
            debug!(
                "Selected route by weight: {} (weight {})",
                route.full_url(),
                route.weight
            );
        }
        Ok(selected)
    }

    /// Pick a route with probability proportional to its composite score
    ///
    /// Falls back to weight-based selection when no score mass exists, and
    /// to the top-scored route when floating rounding exhausts the walk; a
    /// non-empty route set therefore always yields a selection here.
    pub async fn select_by_performance(
        &self,
        rng: &mut fastrand::Rng,
    ) -> Result<Option<DownloadRoute>, AppError> {
        let routes = self.routes.find_all().await?;
        if routes.is_empty() {
            return Ok(None);
        }

        let performances = self.scoring.score_routes(&routes).await?;
        let scores: HashMap<Uuid, f64> = performances
            .into_iter()
            .map(|p| (p.route_id, p.composite_score))
            .collect();

        match pick_by_score(&routes, &scores, rng) {
            Some(route) => {
                debug!(
                    "Selected route by performance: {} (score {:.2})",
                    route.full_url(),
                    scores.get(&route.id).copied().unwrap_or(0.0)
                );
                Ok(Some(route))
            }
            None => {
                warn!("No positive score mass across {} routes, falling back to weight", routes.len());
                Ok(pick_by_weight(&routes, rng))
            }
        }
    }
}

/// Weighted-random choice: draw a uniform integer in `[0, total_weight)`
/// and walk the list until the cumulative weight exceeds it
pub fn pick_by_weight(routes: &[DownloadRoute], rng: &mut fastrand::Rng) -> Option<DownloadRoute> {
    if routes.is_empty() {
        return None;
    }

    let total_weight: i64 = routes.iter().map(|r| r.weight.max(0) as i64).sum();
    if total_weight == 0 {
        return None;
    }

    let draw = rng.i64(0..total_weight);
    let mut cumulative = 0i64;
    for route in routes {
        cumulative += route.weight.max(0) as i64;
        if draw < cumulative {
            return Some(route.clone());
        }
    }

    // The draw is bounded by the total, so the walk cannot exhaust; keep
    // the first route as a safety net
    routes.first().cloned()
}

/// Score-proportional choice over non-negative score mass
///
/// Returns `None` when the total mass is zero or negative so the caller
/// can fall back to weights. When rounding makes the walk run past the
/// last entry, the highest-scored route wins deterministically (ties by
/// route id ascending).
pub fn pick_by_score(
    routes: &[DownloadRoute],
    scores: &HashMap<Uuid, f64>,
    rng: &mut fastrand::Rng,
) -> Option<DownloadRoute> {
    if routes.is_empty() {
        return None;
    }

    let score_of = |route: &DownloadRoute| scores.get(&route.id).copied().unwrap_or(0.0).max(0.0);

    let total: f64 = routes.iter().map(score_of).sum();
    if total <= 0.0 {
        return None;
    }

    let draw = rng.f64() * total;
    let mut cumulative = 0.0;
    for route in routes {
        cumulative += score_of(route);
        if cumulative >= draw {
            return Some(route.clone());
        }
    }

    routes
        .iter()
        .max_by(|a, b| {
            score_of(a)
                .partial_cmp(&score_of(b))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        })
        .cloned()
}
