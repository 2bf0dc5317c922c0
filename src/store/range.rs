//! Loaded-range bookkeeping for one cache store.
//!
//! The tracker turns `ensure_loaded` into a decision: already covered,
//! coalesced onto an in-flight load, or a fetch with concrete bounds.
//! [`LoadTracker::plan`] decides and marks the load in flight in one call,
//! so callers holding the store lock cannot interleave between the check
//! and the flag.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// What happened to a record while a load was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Touch {
    Upserted,
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// Inclusive lower bound; `DateTime::<Utc>::MIN_UTC` means full history.
    pub since: DateTime<Utc>,
    /// Exclusive upper bound, set when only the gap below the current
    /// window is fetched.
    pub before: Option<DateTime<Utc>>,
    /// Union the result into the current records instead of replacing them.
    pub merge: bool,
}

impl FetchPlan {
    pub fn is_full_history(&self) -> bool {
        self.since == DateTime::<Utc>::MIN_UTC
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    Covered,
    Coalesced,
    Fetch(FetchPlan),
}

#[derive(Debug)]
struct InFlight {
    since: DateTime<Utc>,
    touches: HashMap<String, Touch>,
}

#[derive(Debug, Default)]
pub struct LoadTracker {
    loaded_since: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
}

impl LoadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded_since.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn loaded_since(&self) -> Option<DateTime<Utc>> {
        self.loaded_since
    }

    /// Decide how to satisfy a load request and, when a fetch is needed,
    /// mark it in flight.
    ///
    /// `default_since` applies when neither the caller nor a previous load
    /// supplies a lower bound.
    pub fn plan(
        &mut self,
        force: bool,
        since: Option<DateTime<Utc>>,
        default_since: DateTime<Utc>,
    ) -> LoadPlan {
        if !force
            && let Some(loaded) = self.loaded_since
            && since.is_none_or(|since| since >= loaded)
        {
            return LoadPlan::Covered;
        }

        if self.in_flight.is_some() {
            return LoadPlan::Coalesced;
        }

        let requested = since.or(self.loaded_since).unwrap_or(default_since);
        let plan = match self.loaded_since {
            Some(loaded) if !force && requested < loaded => FetchPlan {
                since: requested,
                before: Some(loaded),
                merge: true,
            },
            Some(loaded) => FetchPlan {
                since: requested.min(loaded),
                before: None,
                merge: false,
            },
            None => FetchPlan {
                since: requested,
                before: None,
                merge: false,
            },
        };

        self.in_flight = Some(InFlight {
            since: plan.since,
            touches: HashMap::new(),
        });
        LoadPlan::Fetch(plan)
    }

    /// Close the in-flight load. On success the window widens to cover the
    /// plan and the touches recorded meanwhile are returned for replay.
    pub fn finish(&mut self, plan: &FetchPlan) -> HashMap<String, Touch> {
        let touches = self
            .in_flight
            .take()
            .map(|in_flight| in_flight.touches)
            .unwrap_or_default();

        self.loaded_since = Some(match self.loaded_since {
            Some(loaded) => loaded.min(plan.since),
            None => plan.since,
        });
        touches
    }

    /// Drop the in-flight marker without changing the loaded window.
    pub fn abort(&mut self) {
        self.in_flight = None;
    }

    pub fn touch(&mut self, id: &str, touch: Touch) {
        if let Some(in_flight) = self.in_flight.as_mut() {
            in_flight.touches.insert(id.to_string(), touch);
        }
    }

    /// Lower edge of the window records must stay within: the loaded window
    /// widened by any in-flight load. `None` when nothing is loaded or
    /// loading.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        match (self.loaded_since, self.in_flight.as_ref()) {
            (Some(loaded), Some(in_flight)) => Some(loaded.min(in_flight.since)),
            (Some(loaded), None) => Some(loaded),
            (None, Some(in_flight)) => Some(in_flight.since),
            (None, None) => None,
        }
    }

    pub fn admits(&self, ts: DateTime<Utc>) -> bool {
        self.window_start().is_some_and(|start| ts >= start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_first_load_uses_default() {
        let mut tracker = LoadTracker::new();
        let plan = tracker.plan(false, None, day(10));
        assert_eq!(
            plan,
            LoadPlan::Fetch(FetchPlan {
                since: day(10),
                before: None,
                merge: false
            })
        );
        assert!(tracker.is_loading());
        assert!(!tracker.is_loaded());
    }

    #[test]
    fn test_second_request_while_loading_coalesces() {
        let mut tracker = LoadTracker::new();
        assert!(matches!(tracker.plan(false, None, day(10)), LoadPlan::Fetch(_)));
        assert_eq!(tracker.plan(false, Some(day(1)), day(10)), LoadPlan::Coalesced);
        assert_eq!(tracker.plan(true, None, day(10)), LoadPlan::Coalesced);
    }

    #[test]
    fn test_covered_and_widening() {
        let mut tracker = LoadTracker::new();
        let LoadPlan::Fetch(plan) = tracker.plan(false, None, day(10)) else {
            panic!("expected fetch");
        };
        tracker.finish(&plan);
        assert_eq!(tracker.loaded_since(), Some(day(10)));

        assert_eq!(tracker.plan(false, None, day(20)), LoadPlan::Covered);
        assert_eq!(tracker.plan(false, Some(day(15)), day(20)), LoadPlan::Covered);

        let plan = tracker.plan(false, Some(day(3)), day(20));
        assert_eq!(
            plan,
            LoadPlan::Fetch(FetchPlan {
                since: day(3),
                before: Some(day(10)),
                merge: true
            })
        );
        let LoadPlan::Fetch(plan) = plan else { unreachable!() };
        tracker.finish(&plan);
        assert_eq!(tracker.loaded_since(), Some(day(3)));
    }

    #[test]
    fn test_forced_reload_keeps_wider_bound() {
        let mut tracker = LoadTracker::new();
        let LoadPlan::Fetch(plan) = tracker.plan(false, Some(day(2)), day(10)) else {
            panic!("expected fetch");
        };
        tracker.finish(&plan);

        let LoadPlan::Fetch(plan) = tracker.plan(true, Some(day(8)), day(10)) else {
            panic!("expected fetch");
        };
        assert_eq!(plan.since, day(2));
        assert!(!plan.merge);
        assert!(plan.before.is_none());
    }

    #[test]
    fn test_abort_releases_without_loading() {
        let mut tracker = LoadTracker::new();
        assert!(matches!(tracker.plan(false, None, day(10)), LoadPlan::Fetch(_)));
        tracker.abort();
        assert!(!tracker.is_loading());
        assert!(!tracker.is_loaded());
        assert!(matches!(tracker.plan(false, None, day(10)), LoadPlan::Fetch(_)));
    }

    #[test]
    fn test_touches_recorded_only_while_loading() {
        let mut tracker = LoadTracker::new();
        tracker.touch("ignored", Touch::Upserted);

        let LoadPlan::Fetch(plan) = tracker.plan(false, None, day(10)) else {
            panic!("expected fetch");
        };
        tracker.touch("a", Touch::Upserted);
        tracker.touch("a", Touch::Removed);
        tracker.touch("b", Touch::Upserted);

        let touches = tracker.finish(&plan);
        assert_eq!(touches.len(), 2);
        assert_eq!(touches["a"], Touch::Removed);
        assert!(!touches.contains_key("ignored"));
    }

    #[test]
    fn test_window_admits() {
        let mut tracker = LoadTracker::new();
        assert!(!tracker.admits(day(15)));

        let LoadPlan::Fetch(plan) = tracker.plan(false, None, day(10)) else {
            panic!("expected fetch");
        };
        assert!(tracker.admits(day(10)));
        assert!(!tracker.admits(day(9)));
        tracker.finish(&plan);
        assert!(tracker.admits(day(12)));
        assert!(!tracker.admits(day(1)));
    }
}
