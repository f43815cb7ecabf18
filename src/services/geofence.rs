//! Geofence trigger evaluation
//!
//! Decides, per position sample and candidate POI, whether narration fires.
//! Checks run in a fixed order:
//! 1. Debounce - nothing fires until `debounce` has elapsed since `start`
//! 2. Radius - candidate must be within `radius_m` (inclusive)
//! 3. Cooldown - a POI that fired stays quiet for `cooldown`
//!
//! The cooldown table is owned by the evaluator, so each session gets its
//! own. It is only written on a fired decision and pruned lazily.

use crate::domain::geo::distance_m;
use crate::domain::types::{PoiCandidate, PoiId, Position, TriggerDecision, TriggerReason};
use crate::infra::config::Config;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustc_hash::FxHashMap;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeofencePhase {
    NotStarted,
    Debouncing,
    Active,
}

pub struct GeofenceEvaluator {
    radius_m: f64,
    debounce: ChronoDuration,
    cooldown: ChronoDuration,
    started_at: Option<DateTime<Utc>>,
    /// POI -> time it last fired
    last_fired: FxHashMap<PoiId, DateTime<Utc>>,
}

fn to_chrono(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::MAX)
}

impl GeofenceEvaluator {
    pub fn new(radius_m: f64, debounce: Duration, cooldown: Duration) -> Self {
        Self {
            radius_m,
            debounce: to_chrono(debounce),
            cooldown: to_chrono(cooldown),
            started_at: None,
            last_fired: FxHashMap::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.geofence_radius_m(),
            Duration::from_millis(config.debounce_ms()),
            Duration::from_secs(config.cooldown_secs()),
        )
    }

    /// Begin a tracking session; opens the debounce window at `now`
    pub fn start(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
        info!(
            radius_m = %self.radius_m,
            debounce_ms = %self.debounce.num_milliseconds(),
            cooldown_secs = %self.cooldown.num_seconds(),
            "geofence_started"
        );
    }

    /// End the session: forget cooldowns and return to `NotStarted`
    pub fn stop(&mut self) {
        let cleared = self.last_fired.len();
        self.started_at = None;
        self.last_fired.clear();
        debug!(cleared = %cleared, "geofence_stopped");
    }

    /// Re-arm a POI whose fired narration never made it downstream
    pub fn forget(&mut self, poi_id: PoiId) -> bool {
        self.last_fired.remove(&poi_id).is_some()
    }

    pub fn phase(&self, now: DateTime<Utc>) -> GeofencePhase {
        match self.started_at {
            None => GeofencePhase::NotStarted,
            Some(started) if now - started < self.debounce => GeofencePhase::Debouncing,
            Some(_) => GeofencePhase::Active,
        }
    }

    /// POIs currently remembered as fired (including expired entries not yet pruned)
    pub fn cooldown_len(&self) -> usize {
        self.last_fired.len()
    }

    /// Evaluate one sample against every candidate, highest priority first.
    ///
    /// Returns one decision per candidate, in evaluation order. Equal
    /// priorities keep their input order.
    pub fn evaluate(
        &mut self,
        position: &Position,
        candidates: &[PoiCandidate],
        now: DateTime<Utc>,
    ) -> Vec<TriggerDecision> {
        self.prune_expired(now);
        let phase = self.phase(now);

        let mut order: Vec<&PoiCandidate> = candidates.iter().collect();
        order.sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut decisions = Vec::with_capacity(order.len());
        for poi in order {
            let distance = distance_m(position, poi);
            let reason = self.check(poi.id, distance, phase, now);
            if reason == TriggerReason::Fired {
                self.last_fired.insert(poi.id, now);
                info!(
                    poi_id = %poi.id,
                    name = %poi.name,
                    distance_m = format!("{:.1}", distance),
                    priority = %poi.priority,
                    "geofence_fired"
                );
            } else {
                debug!(
                    poi_id = %poi.id,
                    reason = %reason.as_str(),
                    distance_m = format!("{:.1}", distance),
                    "geofence_suppressed"
                );
            }
            decisions.push(TriggerDecision::new(poi.id, reason, distance));
        }
        decisions
    }

    fn check(
        &self,
        poi_id: PoiId,
        distance: f64,
        phase: GeofencePhase,
        now: DateTime<Utc>,
    ) -> TriggerReason {
        if phase != GeofencePhase::Active {
            return TriggerReason::Debounced;
        }
        if distance > self.radius_m {
            return TriggerReason::OutOfRadius;
        }
        match self.last_fired.get(&poi_id) {
            Some(&fired_at) if now - fired_at < self.cooldown => TriggerReason::OnCooldown,
            _ => TriggerReason::Fired,
        }
    }

    fn prune_expired(&mut self, now: DateTime<Utc>) {
        let cooldown = self.cooldown;
        self.last_fired.retain(|_, fired_at| now - *fired_at < cooldown);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::geo::offset_north;

    const LAT: f64 = 10.7615;
    const LON: f64 = 106.7027;

    fn evaluator() -> GeofenceEvaluator {
        GeofenceEvaluator::new(50.0, Duration::from_secs(3), Duration::from_secs(600))
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-01T08:00:00Z").unwrap().with_timezone(&Utc)
    }

    fn at(meters_north: f64, now: DateTime<Utc>) -> Position {
        Position::new(offset_north(LAT, meters_north), LON, now)
    }

    #[test]
    fn test_not_started_is_debounced() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "Ben Thanh", LAT, LON);
        let now = t0();

        let decisions = eval.evaluate(&at(0.0, now), &[poi], now);
        assert_eq!(decisions[0].reason, TriggerReason::Debounced);
        assert_eq!(eval.phase(now), GeofencePhase::NotStarted);
    }

    #[test]
    fn test_debounce_window() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "Ben Thanh", LAT, LON);
        let start = t0();
        eval.start(start);

        let early = start + ChronoDuration::milliseconds(2_999);
        let d = eval.evaluate(&at(0.0, early), std::slice::from_ref(&poi), early);
        assert_eq!(d[0].reason, TriggerReason::Debounced);
        assert_eq!(eval.phase(early), GeofencePhase::Debouncing);

        let ready = start + ChronoDuration::milliseconds(3_000);
        let d = eval.evaluate(&at(0.0, ready), &[poi], ready);
        assert_eq!(d[0].reason, TriggerReason::Fired);
        assert_eq!(eval.phase(ready), GeofencePhase::Active);
    }

    #[test]
    fn test_debounce_applies_out_of_radius_too() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "Far", LAT, LON);
        eval.start(t0());

        let d = eval.evaluate(&at(500.0, t0()), &[poi], t0());
        assert_eq!(d[0].reason, TriggerReason::Debounced);
    }

    #[test]
    fn test_out_of_radius_never_fires() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "Far", LAT, LON);
        eval.start(t0());
        let now = t0() + ChronoDuration::seconds(10);

        let d = eval.evaluate(&at(50.5, now), &[poi], now);
        assert_eq!(d[0].reason, TriggerReason::OutOfRadius);
        assert!(!d[0].fired);
        assert_eq!(eval.cooldown_len(), 0);
    }

    #[test]
    fn test_cooldown_suppresses_then_expires() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "Nha Tho", LAT, LON);
        eval.start(t0());

        let first = t0() + ChronoDuration::seconds(5);
        let d = eval.evaluate(&at(30.0, first), std::slice::from_ref(&poi), first);
        assert_eq!(d[0].reason, TriggerReason::Fired);

        let two_min = first + ChronoDuration::minutes(2);
        let d = eval.evaluate(&at(30.0, two_min), std::slice::from_ref(&poi), two_min);
        assert_eq!(d[0].reason, TriggerReason::OnCooldown);

        let later = first + ChronoDuration::minutes(10);
        let d = eval.evaluate(&at(30.0, later), &[poi], later);
        assert_eq!(d[0].reason, TriggerReason::Fired);
    }

    #[test]
    fn test_priority_order_stable() {
        let mut eval = evaluator();
        eval.start(t0());
        let now = t0() + ChronoDuration::seconds(5);

        let candidates = vec![
            PoiCandidate::new(1, "A", LAT, LON).with_priority(5),
            PoiCandidate::new(2, "B", LAT, LON).with_priority(10),
            PoiCandidate::new(3, "C", LAT, LON).with_priority(5),
        ];
        let d = eval.evaluate(&at(10.0, now), &candidates, now);

        let ids: Vec<i64> = d.iter().map(|x| x.poi_id.0).collect();
        assert_eq!(ids, vec![2, 1, 3]);
        assert!(d.iter().all(|x| x.fired));
    }

    #[test]
    fn test_stop_clears_cooldowns() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "A", LAT, LON);
        eval.start(t0());
        let now = t0() + ChronoDuration::seconds(5);
        eval.evaluate(&at(0.0, now), std::slice::from_ref(&poi), now);
        assert_eq!(eval.cooldown_len(), 1);

        eval.stop();
        assert_eq!(eval.cooldown_len(), 0);
        assert_eq!(eval.phase(now), GeofencePhase::NotStarted);

        eval.start(now);
        let after = now + ChronoDuration::seconds(3);
        let d = eval.evaluate(&at(0.0, after), &[poi], after);
        assert_eq!(d[0].reason, TriggerReason::Fired);
    }

    #[test]
    fn test_forget_rearms_poi() {
        let mut eval = evaluator();
        let poi = PoiCandidate::new(1, "A", LAT, LON);
        eval.start(t0());
        let now = t0() + ChronoDuration::seconds(5);
        eval.evaluate(&at(0.0, now), std::slice::from_ref(&poi), now);

        let later = now + ChronoDuration::seconds(30);
        let d = eval.evaluate(&at(0.0, later), std::slice::from_ref(&poi), later);
        assert_eq!(d[0].reason, TriggerReason::OnCooldown);

        assert!(eval.forget(PoiId(1)));
        assert!(!eval.forget(PoiId(1)));
        let d = eval.evaluate(&at(0.0, later), &[poi], later);
        assert_eq!(d[0].reason, TriggerReason::Fired);
    }

    #[test]
    fn test_empty_candidates() {
        let mut eval = evaluator();
        eval.start(t0());
        assert!(eval.evaluate(&at(0.0, t0()), &[], t0()).is_empty());
    }
}
