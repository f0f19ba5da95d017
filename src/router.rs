//! Fallback Router — chooses one endpoint per attempt from a pool snapshot,
//! health snapshot, and the set of endpoints already tried this request.
//!
//! The router's only owned mutable state is a round-robin cursor, advanced
//! with a single atomic fetch-add so concurrent callers never block each
//! other to get a selection.

use std::{
    collections::HashSet,
    sync::atomic::{AtomicUsize, Ordering},
};

use rand::seq::SliceRandom;

use crate::{
    health::HealthTracker,
    pool::{ModelEndpoint, ModelPool},
};

/// Selection strategy (default: [`RouterStrategy::HealthAware`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterStrategy {
    /// Declared primary, then declared fallbacks in order, then the
    /// by-priority sequence — ignores health entirely.
    PriorityOnly,
    /// Declared primary if available, else the first available declared
    /// fallback, else the highest-priority available endpoint.
    #[default]
    HealthAware,
    /// The first available endpoint from the health-sorted sequence.
    HealthFirst,
    /// Cyclic index over the available set.
    RoundRobin,
    /// Uniform random pick over the available set.
    Random,
}

/// The primary/fallback ids declared for a request, as configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouteSpec<'a> {
    pub primary: Option<&'a str>,
    pub fallbacks: &'a [String],
}

/// Picks endpoints one attempt at a time.
pub struct FallbackRouter {
    strategy: RouterStrategy,
    cursor: AtomicUsize,
}

impl FallbackRouter {
    pub fn new(strategy: RouterStrategy) -> Self {
        Self { strategy, cursor: AtomicUsize::new(0) }
    }

    pub fn strategy(&self) -> RouterStrategy {
        self.strategy
    }

    /// Pick the next endpoint to try, excluding anything in `excluded`
    /// (endpoints already attempted this request) and restricting the pool
    /// to image-capable endpoints when `vision` is set.
    ///
    /// Returns `None` when the candidate set is empty — the caller surfaces
    /// `NoAvailableModels`.
    pub fn select<'a>(
        &self,
        pool: &'a ModelPool,
        tracker: &HealthTracker,
        vision: bool,
        route: RouteSpec<'_>,
        excluded: &HashSet<String>,
    ) -> Option<&'a ModelEndpoint> {
        let candidates: Vec<&'a ModelEndpoint> = if vision { pool.image_endpoints() } else { pool.text_endpoints() }
            .into_iter()
            .filter(|e| !excluded.contains(&e.id))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            RouterStrategy::PriorityOnly => self.select_priority_only(&candidates, route),
            RouterStrategy::HealthAware => self.select_health_aware(&candidates, tracker, route),
            RouterStrategy::HealthFirst => self.select_health_first(&candidates, tracker),
            RouterStrategy::RoundRobin => self.select_round_robin(&candidates, tracker),
            RouterStrategy::Random => self.select_random(&candidates, tracker),
        }
    }

    fn select_priority_only<'a>(
        &self,
        candidates: &[&'a ModelEndpoint],
        route: RouteSpec<'_>,
    ) -> Option<&'a ModelEndpoint> {
        if let Some(primary) = route.primary {
            if let Some(e) = candidates.iter().find(|e| e.id == primary) {
                return Some(e);
            }
        }
        for fallback in route.fallbacks {
            if let Some(e) = candidates.iter().find(|e| &e.id == fallback) {
                return Some(e);
            }
        }
        by_priority_order(candidates).into_iter().next()
    }

    fn select_health_aware<'a>(
        &self,
        candidates: &[&'a ModelEndpoint],
        tracker: &HealthTracker,
        route: RouteSpec<'_>,
    ) -> Option<&'a ModelEndpoint> {
        let available: Vec<&'a ModelEndpoint> =
            candidates.iter().copied().filter(|e| tracker.is_available(&e.id)).collect();
        if available.is_empty() {
            return None;
        }

        if let Some(primary) = route.primary {
            if let Some(e) = available.iter().find(|e| e.id == primary) {
                return Some(e);
            }
        }
        for fallback in route.fallbacks {
            if let Some(e) = available.iter().find(|e| &e.id == fallback) {
                return Some(e);
            }
        }
        highest_priority(&available, tracker).into_iter().next()
    }

    fn select_health_first<'a>(
        &self,
        candidates: &[&'a ModelEndpoint],
        tracker: &HealthTracker,
    ) -> Option<&'a ModelEndpoint> {
        let available: Vec<&'a ModelEndpoint> =
            candidates.iter().copied().filter(|e| tracker.is_available(&e.id)).collect();
        tracker.by_health(&available).into_iter().next()
    }

    fn select_round_robin<'a>(
        &self,
        candidates: &[&'a ModelEndpoint],
        tracker: &HealthTracker,
    ) -> Option<&'a ModelEndpoint> {
        let available: Vec<&'a ModelEndpoint> =
            candidates.iter().copied().filter(|e| tracker.is_available(&e.id)).collect();
        if available.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % available.len();
        Some(available[idx])
    }

    fn select_random<'a>(
        &self,
        candidates: &[&'a ModelEndpoint],
        tracker: &HealthTracker,
    ) -> Option<&'a ModelEndpoint> {
        let available: Vec<&'a ModelEndpoint> =
            candidates.iter().copied().filter(|e| tracker.is_available(&e.id)).collect();
        available.choose(&mut rand::thread_rng()).copied()
    }
}

/// Lowest tier first, catalog order for ties.
fn by_priority_order<'a>(candidates: &[&'a ModelEndpoint]) -> Vec<&'a ModelEndpoint> {
    let mut v = candidates.to_vec();
    v.sort_by_key(|e| e.tier);
    v
}

/// Lower tier wins; equal tier broken by higher score; equal score by
/// catalog (input) order.
fn highest_priority<'a>(available: &[&'a ModelEndpoint], tracker: &HealthTracker) -> Vec<&'a ModelEndpoint> {
    let mut v = available.to_vec();
    v.sort_by(|a, b| {
        a.tier.cmp(&b.tier).then_with(|| {
            let sa = tracker.snapshot(&a.id).map(|h| h.score()).unwrap_or(1.0);
            let sb = tracker.snapshot(&b.id).map(|h| h.score()).unwrap_or(1.0);
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    v
}
