//! Sampling predicates evaluated on container names.
//!
//! A predicate sees only the cheap identifier of a container (a file or
//! archive member name) and decides whether the container takes part in a
//! run. Rejected containers are never decompressed or parsed, and they are
//! not assigned a container id.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Shared predicate deciding whether a container, given its name, is processed.
pub type SamplePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Accepts every container.
pub fn all() -> SamplePredicate {
    Arc::new(|_| true)
}

/// Accepts roughly `fraction` of all containers.
///
/// The decision for a name depends only on the name and `seed`, so repeated
/// enumerations (in any order, with fresh or reused predicates) accept the
/// same set.
pub fn random_fraction(fraction: f64, seed: u64) -> SamplePredicate {
    let fraction = fraction.clamp(0.0, 1.0);
    Arc::new(move |name| {
        if fraction >= 1.0 {
            return true;
        }
        let mut rng = StdRng::seed_from_u64(seed ^ name_hash(name));
        rng.gen::<f64>() < fraction
    })
}

/// Accepts containers whose name contains `needle`.
pub fn name_contains(needle: impl Into<String>) -> SamplePredicate {
    let needle = needle.into();
    Arc::new(move |name| name.contains(needle.as_str()))
}

/// FNV-1a over the name bytes; stable across processes and toolchains.
fn name_hash(name: &str) -> u64 {
    name.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |hash, b| {
        (hash ^ u64::from(b)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        (0..500).map(|i| format!("{i}.json.gz")).collect()
    }

    #[test]
    fn same_seed_same_selection() {
        let a = random_fraction(0.2, 7);
        let b = random_fraction(0.2, 7);
        let picked_a: Vec<_> = names().into_iter().filter(|n| a(n)).collect();
        let picked_b: Vec<_> = names().into_iter().rev().filter(|n| b(n)).collect();
        let mut picked_b = picked_b;
        picked_b.reverse();
        assert_eq!(picked_a, picked_b);
        assert!(!picked_a.is_empty());
        assert!(picked_a.len() < 250, "fraction 0.2 picked {}", picked_a.len());
    }

    #[test]
    fn different_seed_changes_selection() {
        let a = random_fraction(0.5, 1);
        let b = random_fraction(0.5, 2);
        let differs = names().iter().any(|n| a(n) != b(n));
        assert!(differs);
    }

    #[test]
    fn bounds_are_respected() {
        let none = random_fraction(0.0, 3);
        let every = random_fraction(1.0, 3);
        assert!(names().iter().all(|n| !none(n)));
        assert!(names().iter().all(|n| every(n)));
    }

    #[test]
    fn name_filter() {
        let p = name_contains("2021");
        assert!(p("works-2021-01.json.gz"));
        assert!(!p("works-2020-12.json.gz"));
    }
}
