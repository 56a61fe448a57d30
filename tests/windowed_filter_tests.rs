mod common;

use common::test_utils::test_config;
use rand::Rng;
use std::sync::Arc;
use term_bloom_rs::{
    FilterConfigBuilder, FilterError, InMemoryArchive, TermArchive,
    TermWindowedFilter,
};

fn create_test_filter(
    capacity: u64,
    fpr: f64,
    retention: u64,
) -> TermWindowedFilter {
    TermWindowedFilter::new(test_config(capacity, fpr, retention))
        .expect("Failed to create test filter")
}

#[cfg(test)]
mod basic_operations_tests {
    use super::*;

    #[test]
    fn test_worked_scenario() {
        let mut filter = create_test_filter(4000, 1e-7, 3);

        assert!(!filter.set(b"key1"));
        assert!(filter.check(b"key1"));

        filter.update_term(1).unwrap();
        assert!(filter.check(b"key1"));
        assert!(!filter.set(b"key2"));

        filter.update_term(2).unwrap();
        assert!(filter.check(b"key1"));
        assert!(filter.check(b"key2"));

        assert!(!filter.set_with_term(3, b"key3").unwrap());
        assert!(!filter.check(b"key1"));
        assert!(filter.check(b"key2"));
        assert!(filter.check(b"key3"));
        assert_eq!(filter.terms(), (1, 3));
    }

    #[test]
    fn test_idempotent_marking() {
        let mut filter = create_test_filter(100, 1e-7, 3);
        assert!(!filter.set(b"dup"));
        assert_eq!(filter.remaining_capacity(), 99);
        assert!(filter.set(b"dup"));
        assert_eq!(filter.remaining_capacity(), 99);

        // known from a closed term: nothing is written to the active one
        filter.update_term(1).unwrap();
        assert!(filter.set(b"dup"));
        assert_eq!(filter.remaining_capacity(), 100);
        assert_eq!(filter.slot(1).unwrap().bits().count_ones(), 0);
    }

    #[test]
    fn test_no_false_negatives() {
        let mut filter = create_test_filter(300, 0.01, 4);
        let keys: Vec<String> =
            (0..1000).map(|i| format!("event_{i:06}")).collect();
        for key in &keys {
            filter.set(key.as_bytes());
        }
        // 1000 keys over terms of 300 fit in four terms
        assert!(filter.latest_term() <= 3);
        for key in &keys {
            assert!(filter.check(key.as_bytes()), "lost {key}");
        }
    }

    #[test]
    fn test_invalid_configuration() {
        for (capacity, fpr, retention) in
            [(0, 0.01, 3), (100, 0.0, 3), (100, 1.0, 3), (100, 0.01, 0)]
        {
            let config = FilterConfigBuilder::default()
                .capacity(capacity)
                .false_positive_rate(fpr)
                .retention(retention)
                .build()
                .unwrap();
            assert!(matches!(
                TermWindowedFilter::new(config),
                Err(FilterError::InvalidConfig(_))
            ));
        }
    }
}

#[cfg(test)]
mod term_tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let mut filter = create_test_filter(1000, 1e-7, 3);
        filter.set(b"K");
        filter.update_term(2).unwrap();
        assert!(filter.check(b"K"));
        filter.update_term(3).unwrap();
        assert_eq!(filter.terms(), (1, 3));
        assert!(!filter.check(b"K"));
    }

    #[test]
    fn test_monotonic_terms() {
        let mut filter = create_test_filter(1000, 1e-7, 3);
        filter.set(b"a");
        filter.update_term(5).unwrap();
        filter.set(b"b");
        let before = filter.stats();

        let err = filter.update_term(4).unwrap_err();
        assert!(matches!(
            err,
            FilterError::ExpiredTerm {
                current: 5,
                given: 4
            }
        ));
        assert!(filter.set_with_term(0, b"c").is_err());
        assert!(filter.check_with_term(1, b"b").is_err());
        assert_eq!(filter.stats(), before);
        assert!(!filter.check(b"c"));

        // same term is a no-op
        filter.update_term(5).unwrap();
        assert_eq!(filter.stats(), before);
    }

    #[test]
    fn test_capacity_driven_rotation() {
        let mut filter = create_test_filter(100, 1e-11, 3);
        let expected = [(0, 1), (0, 2), (1, 3), (2, 4), (3, 5)];

        for (round, window) in expected.iter().enumerate() {
            for i in 0..100 {
                filter.set(format!("round_{round}_key_{i}").as_bytes());
            }
            assert_eq!(filter.terms(), *window, "after round {round}");
            assert_eq!(filter.remaining_capacity(), 100);
        }
    }

    #[test]
    fn test_rotation_bound() {
        let mut rng = rand::rng();
        let retention = 4;
        let mut filter = create_test_filter(25, 0.001, retention);

        for i in 0..5000 {
            if rng.random_range(0..100) < 3 {
                let jump = rng.random_range(0..6);
                filter.update_term(filter.latest_term() + jump).unwrap();
            } else {
                filter.set(format!("op_{i}").as_bytes());
            }

            let (earliest, latest) = filter.terms();
            assert!(earliest <= latest);
            assert!(latest - earliest < retention);
            let active = filter.slot(latest).expect("active slot is live");
            assert_eq!(active.term(), latest);
            assert!((1..=25).contains(&filter.remaining_capacity()));
        }
    }

    #[test]
    fn test_jump_skips_stale_slots() {
        let mut filter = create_test_filter(1000, 1e-7, 3);
        filter.set(b"zero");
        filter.update_term(4).unwrap();

        assert_eq!(filter.terms(), (2, 4));
        // term 3 shares a ring position with term 0, which was never relabeled
        assert!(filter.slot(3).is_none());
        assert!(!filter.check(b"zero"));
        assert_eq!(filter.slot(2).unwrap().bits().count_ones(), 0);
    }
}

#[cfg(test)]
mod probabilistic_tests {
    use super::*;

    #[test]
    fn test_false_positive_rate() {
        let capacity = 10_000;
        let fpr = 0.01;
        let mut filter = create_test_filter(capacity, fpr, 1);
        let mut rng = rand::rng();

        // one short of capacity, so the only term never rotates
        for i in 0..capacity - 1 {
            filter.set(format!("in_{i}").as_bytes());
        }
        assert_eq!(filter.latest_term(), 0);

        let samples = 100_000;
        let false_positives = (0..samples)
            .filter(|_| {
                let key = format!("out_{}", rng.random::<u64>());
                filter.check(key.as_bytes())
            })
            .count();
        let observed = false_positives as f64 / samples as f64;
        assert!(
            observed < fpr * 3.0,
            "false positive rate {observed} too far above {fpr}"
        );
    }
}

#[cfg(test)]
mod archive_tests {
    use super::*;

    #[test]
    fn test_rotated_terms_are_archived() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut filter = TermWindowedFilter::with_archive(
            test_config(10, 1e-7, 2),
            archive.clone(),
        )
        .unwrap();

        for i in 0..35 {
            filter.set(format!("key_{i}").as_bytes());
        }
        assert_eq!(filter.terms(), (2, 3));
        assert_eq!(archive.terms().unwrap(), vec![0, 1, 2]);

        let term0 = filter.load_archived_term(0).unwrap().unwrap();
        assert_eq!(term0.term(), 0);
        assert_eq!(term0.remaining_capacity(), 0);
        assert!(!filter.check(b"key_0"));

        let hasher = filter.geometry().hasher();
        assert!(term0.bits().test_all(&hasher.bit_indices(b"key_0")));
        assert!(filter.load_archived_term(7).unwrap().is_none());
    }

    #[test]
    fn test_explicit_term_advance_archives_and_keeps_first_copy() {
        let archive = Arc::new(InMemoryArchive::new());
        let mut filter = TermWindowedFilter::with_archive(
            test_config(100, 1e-7, 3),
            archive.clone(),
        )
        .unwrap();

        filter.set(b"first");
        filter.update_term(1).unwrap();
        let saved = archive.load_term(0).unwrap().unwrap();

        // a second filter closing the same term does not overwrite it
        let mut other = TermWindowedFilter::with_archive(
            test_config(100, 1e-7, 3),
            archive.clone(),
        )
        .unwrap();
        other.set(b"second");
        other.update_term(1).unwrap();
        assert_eq!(archive.load_term(0).unwrap().unwrap(), saved);
    }

    #[test]
    fn test_no_archive() {
        let mut filter = create_test_filter(10, 0.01, 2);
        for i in 0..25 {
            filter.set(format!("key_{i}").as_bytes());
        }
        assert!(filter.load_archived_term(0).unwrap().is_none());
    }
}
