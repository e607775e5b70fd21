//! One fetch-diff-store pass over the event store.
//!
//! New and existing events are classified against the id set captured before
//! the fetch, so an event inserted during this cycle never counts as already
//! known. Events absent from the fetch are reported as missing but their rows
//! are left in place.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::db::Store;
use crate::error::{ReconcileError, ValidationError};
use crate::fetch::EventSource;
use crate::models::Event;

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub scrape_date: NaiveDate,
    /// Candidates returned by the source, valid or not.
    pub total_fetched: usize,
    /// Distinct valid events written to the store.
    pub stored: usize,
    pub existing: usize,
    /// Valid candidates that repeated an id already seen in the same fetch.
    pub duplicates: usize,
    pub prior_count: usize,
    pub new: Vec<Event>,
    pub missing: Vec<Event>,
    pub dropped: Vec<ValidationError>,
}

impl CycleReport {
    pub fn has_changes(&self) -> bool {
        !self.new.is_empty() || !self.missing.is_empty()
    }

    /// The fetch came back empty while the store already knew events, which
    /// more often means an upstream outage than a mass cancellation.
    pub fn outage_suspected(&self) -> bool {
        self.total_fetched == 0 && self.prior_count > 0
    }
}

pub struct Reconciler<'a, S: EventSource + ?Sized> {
    store: &'a mut Store,
    source: &'a S,
    scrape_date: NaiveDate,
}

impl<'a, S: EventSource + ?Sized> Reconciler<'a, S> {
    pub fn new(store: &'a mut Store, source: &'a S, scrape_date: NaiveDate) -> Self {
        Self {
            store,
            source,
            scrape_date,
        }
    }

    pub fn reconcile(&mut self) -> Result<CycleReport, ReconcileError> {
        let prior_ids = self.store.all_ids()?;
        info!(
            known = prior_ids.len(),
            source = %self.source.describe(),
            "starting reconciliation"
        );

        let candidates = self.source.fetch()?;
        let total_fetched = candidates.len();
        info!(fetched = total_fetched, "retrieved candidates");

        let mut dropped = Vec::new();
        let mut valid: Vec<Event> = Vec::with_capacity(total_fetched);
        let mut position: HashMap<String, usize> = HashMap::new();
        let mut duplicates = 0;

        for candidate in candidates {
            match candidate.validate(self.scrape_date) {
                Ok(event) => match position.get(&event.id).copied() {
                    Some(index) => {
                        debug!(id = %event.id, "duplicate id in fetch, keeping last");
                        duplicates += 1;
                        valid[index] = event;
                    }
                    None => {
                        position.insert(event.id.clone(), valid.len());
                        valid.push(event);
                    }
                },
                Err(err) => {
                    warn!("skipping candidate: {err}");
                    dropped.push(err);
                }
            }
        }

        let (new, existing): (Vec<&Event>, Vec<&Event>) = valid
            .iter()
            .partition(|event| !prior_ids.contains(&event.id));
        let new: Vec<Event> = new.into_iter().cloned().collect();
        let existing = existing.len();

        let current_ids = self.store.upsert_events(&valid)?;

        let missing_ids: HashSet<String> = prior_ids.difference(&current_ids).cloned().collect();
        let missing: Vec<Event> = self
            .store
            .events_by_ids(&missing_ids)?
            .into_iter()
            .map(|stored| stored.event)
            .collect();

        let report = CycleReport {
            scrape_date: self.scrape_date,
            total_fetched,
            stored: current_ids.len(),
            existing,
            duplicates,
            prior_count: prior_ids.len(),
            new,
            missing,
            dropped,
        };

        info!(
            stored = report.stored,
            new = report.new.len(),
            missing = report.missing.len(),
            dropped = report.dropped.len(),
            "reconciliation complete"
        );
        if report.outage_suspected() {
            warn!(
                missing = report.missing.len(),
                "fetch returned no events; every known event is reported missing"
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::models::EventCandidate;
    use std::cell::RefCell;

    struct StaticSource {
        batches: RefCell<Vec<Result<Vec<EventCandidate>, FetchError>>>,
    }

    impl StaticSource {
        fn returning(candidates: Vec<EventCandidate>) -> Self {
            Self::sequence(vec![Ok(candidates)])
        }

        fn sequence(batches: Vec<Result<Vec<EventCandidate>, FetchError>>) -> Self {
            let mut batches = batches;
            batches.reverse();
            Self {
                batches: RefCell::new(batches),
            }
        }
    }

    impl EventSource for StaticSource {
        fn describe(&self) -> String {
            "static".to_string()
        }

        fn fetch(&self) -> Result<Vec<EventCandidate>, FetchError> {
            self.batches
                .borrow_mut()
                .pop()
                .unwrap_or_else(|| Ok(Vec::new()))
        }
    }

    fn candidate(id: &str) -> EventCandidate {
        EventCandidate {
            id: Some(id.to_string()),
            name: Some(format!("Tournament {id}")),
            registration_is_open: Some(true),
            start_date: Some("2025-10-01T00:00:00".to_string()),
            end_date: Some("2025-10-02T23:59:59".to_string()),
            city: Some("Sarajevo".to_string()),
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, d).unwrap()
    }

    fn run(store: &mut Store, source: &StaticSource, date: NaiveDate) -> CycleReport {
        Reconciler::new(store, source, date)
            .reconcile()
            .expect("reconcile")
    }

    fn ids(events: &[Event]) -> Vec<&str> {
        let mut out: Vec<&str> = events.iter().map(|e| e.id.as_str()).collect();
        out.sort();
        out
    }

    fn seed(store: &mut Store, list: &[&str], date: NaiveDate) {
        let source = StaticSource::returning(list.iter().map(|id| candidate(id)).collect());
        run(store, &source, date);
    }

    #[test]
    fn first_run_reports_everything_new() {
        let mut store = Store::open_in_memory().unwrap();
        let source = StaticSource::returning(vec![candidate("A"), candidate("B")]);

        let report = run(&mut store, &source, day(1));
        assert_eq!(ids(&report.new), vec!["A", "B"]);
        assert!(report.missing.is_empty());
        assert_eq!(report.stored, 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn detects_new_event() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A", "B"], day(1));

        let source = StaticSource::returning(vec![candidate("A"), candidate("B"), candidate("C")]);
        let report = run(&mut store, &source, day(2));

        assert_eq!(ids(&report.new), vec!["C"]);
        assert!(report.missing.is_empty());
        assert_eq!(report.existing, 2);
        assert_eq!(
            store.all_ids().unwrap(),
            ["A", "B", "C"]
                .iter()
                .map(|s| s.to_string())
                .collect::<HashSet<String>>()
        );
    }

    #[test]
    fn detects_missing_event_without_deleting_it() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A", "B", "C"], day(1));
        let before = store.get_event("C").unwrap().expect("C stored");

        let source = StaticSource::returning(vec![candidate("A"), candidate("B")]);
        let report = run(&mut store, &source, day(2));

        assert_eq!(ids(&report.missing), vec!["C"]);
        assert!(report.new.is_empty());
        assert_eq!(report.missing[0].date_scraped, day(1));

        let after = store.get_event("C").unwrap().expect("C still stored");
        assert_eq!(after.event, before.event);
        assert_eq!(after.updated_at, before.updated_at);
        assert_eq!(store.get_event("A").unwrap().unwrap().event.date_scraped, day(2));
    }

    #[test]
    fn second_identical_run_is_quiet() {
        let mut store = Store::open_in_memory().unwrap();
        let source = StaticSource::sequence(vec![
            Ok(vec![candidate("A"), candidate("B")]),
            Ok(vec![candidate("A"), candidate("B")]),
        ]);

        run(&mut store, &source, day(1));
        let report = run(&mut store, &source, day(1));

        assert!(report.new.is_empty());
        assert!(report.missing.is_empty());
        assert!(!report.has_changes());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let mut store = Store::open_in_memory().unwrap();
        let mut broken = candidate("broken");
        broken.city = None;
        let source = StaticSource::returning(vec![candidate("A"), broken, candidate("B")]);

        let report = run(&mut store, &source, day(1));

        assert_eq!(report.total_fetched, 3);
        assert_eq!(report.stored, 2);
        assert_eq!(ids(&report.new), vec!["A", "B"]);
        assert_eq!(
            report.dropped,
            vec![ValidationError {
                id: Some("broken".to_string()),
                field: "city",
            }]
        );
        assert!(store.get_event("broken").unwrap().is_none());
    }

    #[test]
    fn invalid_candidate_for_known_id_counts_as_missing() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A", "B"], day(1));

        let mut broken = candidate("B");
        broken.name = None;
        let source = StaticSource::returning(vec![candidate("A"), broken]);
        let report = run(&mut store, &source, day(2));

        assert_eq!(ids(&report.missing), vec!["B"]);
        assert_eq!(report.dropped.len(), 1);
    }

    #[test]
    fn empty_fetch_reports_all_prior_events_missing() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A", "B"], day(1));

        let source = StaticSource::returning(Vec::new());
        let report = run(&mut store, &source, day(2));

        assert!(report.new.is_empty());
        assert_eq!(ids(&report.missing), vec!["A", "B"]);
        assert!(report.outage_suspected());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn empty_fetch_on_empty_store_is_not_an_outage() {
        let mut store = Store::open_in_memory().unwrap();
        let report = run(&mut store, &StaticSource::returning(Vec::new()), day(1));
        assert!(!report.outage_suspected());
        assert!(!report.has_changes());
    }

    #[test]
    fn duplicate_ids_collapse_to_last_occurrence() {
        let mut store = Store::open_in_memory().unwrap();
        let mut renamed = candidate("A");
        renamed.city = Some("Mostar".to_string());
        let source = StaticSource::returning(vec![candidate("A"), candidate("B"), renamed]);

        let report = run(&mut store, &source, day(1));

        assert_eq!(ids(&report.new), vec!["A", "B"]);
        assert_eq!(report.duplicates, 1);
        assert_eq!(report.stored, 2);
        assert_eq!(store.get_event("A").unwrap().unwrap().event.city, "Mostar");
    }

    #[test]
    fn fetch_failure_leaves_store_untouched() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A"], day(1));

        let source = StaticSource::sequence(vec![Err(FetchError::Status {
            status: 503,
            body: "unavailable".to_string(),
        })]);
        let result = Reconciler::new(&mut store, &source, day(2)).reconcile();

        assert!(matches!(
            result,
            Err(ReconcileError::Fetch(FetchError::Status { status: 503, .. }))
        ));
        let stored = store.get_event("A").unwrap().unwrap();
        assert_eq!(stored.event.date_scraped, day(1));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn storage_failure_keeps_pre_cycle_state() {
        let mut store = Store::open_in_memory().unwrap();
        seed(&mut store, &["A"], day(1));
        store
            .connection()
            .execute_batch(
                "CREATE TRIGGER reject_bad BEFORE INSERT ON events
                 WHEN NEW.id = 'BAD'
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();

        let source =
            StaticSource::returning(vec![candidate("A"), candidate("B"), candidate("BAD")]);
        let result = Reconciler::new(&mut store, &source, day(2)).reconcile();

        assert!(matches!(result, Err(ReconcileError::Storage(_))));
        assert_eq!(store.count().unwrap(), 1);
        assert!(store.get_event("B").unwrap().is_none());
        assert_eq!(
            store.get_event("A").unwrap().unwrap().event.date_scraped,
            day(1)
        );
    }
}
