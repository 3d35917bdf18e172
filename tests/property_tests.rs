//! Property-based tests for the profile model and filters

use memtrace::event::{CodeEvent, EventKind, MEMORY_UNAVAILABLE};
use memtrace::filter::{EventKindFilter, SourceFilter};
use memtrace::profile::{EventLog, ProfileDocument};
use proptest::prelude::*;
use std::path::PathBuf;

fn kind_strategy() -> impl Strategy<Value = EventKind> {
    prop::sample::select(EventKind::ALL.to_vec())
}

fn event_strategy() -> impl Strategy<Value = CodeEvent> {
    (
        prop_oneof![Just(MEMORY_UNAVAILABLE), 0.0f64..4096.0],
        1u32..5000,
        kind_strategy(),
        "[a-z_]{1,12}(::[a-z_]{1,12}){0,2}",
    )
        .prop_map(|(rss_mb, line, kind, function)| CodeEvent {
            rss_mb,
            rss_delta_mb: if rss_mb < 0.0 { MEMORY_UNAVAILABLE } else { rss_mb / 2.0 },
            line,
            kind,
            function,
        })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_total_events_equals_length(events in prop::collection::vec(event_strategy(), 0..200)) {
        let mut log = EventLog::new();
        for event in &events {
            log.push(event.clone());
        }
        let profile = log.finalize("prop");

        prop_assert_eq!(profile.total_events(), events.len());
        prop_assert_eq!(profile.code_events(), &events[..]);

        let json = serde_json::to_value(&profile).unwrap();
        prop_assert_eq!(json["totalEvents"].as_u64().unwrap() as usize, events.len());
        prop_assert_eq!(json["codeEvents"].as_array().unwrap().len(), events.len());
    }

    #[test]
    fn prop_wire_document_preserves_order(events in prop::collection::vec(event_strategy(), 1..50)) {
        let mut log = EventLog::new();
        for event in &events {
            log.push(event.clone());
        }
        let body = serde_json::to_string(&log.finalize("prop")).unwrap();
        let doc: ProfileDocument = serde_json::from_str(&body).unwrap();

        let lines: Vec<u32> = doc.code_events.iter().map(|e| e.line).collect();
        let expected: Vec<u32> = events.iter().map(|e| e.line).collect();
        prop_assert_eq!(lines, expected);
    }

    #[test]
    fn prop_peak_dominates_every_sample(events in prop::collection::vec(event_strategy(), 0..100)) {
        let mut log = EventLog::new();
        for event in &events {
            log.push(event.clone());
        }
        let profile = log.finalize("prop");

        match profile.peak() {
            Some(peak) => {
                prop_assert!(!peak.memory_unavailable());
                for event in profile.code_events() {
                    prop_assert!(peak.rss_mb >= event.rss_mb);
                }
            }
            None => prop_assert!(events.iter().all(|e| e.memory_unavailable())),
        }
    }

    #[test]
    fn prop_line_maxima_hits_sum_to_line_events(events in prop::collection::vec(event_strategy(), 0..100)) {
        let mut log = EventLog::new();
        for event in &events {
            log.push(event.clone());
        }
        let profile = log.finalize("prop");
        let hits: usize = profile.line_maxima().values().map(|m| m.hits).sum();
        prop_assert_eq!(hits, profile.count_kind(EventKind::Line));
    }

    #[test]
    fn prop_event_expr_never_panics(expr in ".{0,40}") {
        let _ = EventKindFilter::from_expr(&expr);
    }

    #[test]
    fn prop_event_expr_accepts_any_kind_list(kinds in prop::collection::vec(kind_strategy(), 1..6)) {
        let expr = kinds.iter().map(|k| k.as_str()).collect::<Vec<_>>().join(",");
        let filter = EventKindFilter::from_expr(&expr).unwrap();
        for kind in EventKind::ALL {
            prop_assert_eq!(filter.records(kind), kinds.contains(&kind));
        }
    }

    #[test]
    fn prop_source_filter_never_accepts_toolchain_paths(hash in "[0-9a-f]{40}", file in "[a-z]{1,10}") {
        let filter = SourceFilter::with_roots(vec![PathBuf::from("/")]);
        let path = format!("/rustc/{}/library/core/src/{}.rs", hash, file);
        prop_assert!(!filter.contains(&path));
    }
}
