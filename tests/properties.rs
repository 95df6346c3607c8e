use std::collections::BTreeSet;

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use cerrla::distribution::EPSILON;
use cerrla::{Predicate, ProbabilityDistribution, Term, UnificationVerdict, Unifier};

fn term_strategy(ground: bool) -> BoxedStrategy<Term> {
    let constants = prop::sample::select(vec!["a", "b", "c", "floor"]).prop_map(|c| Term::constant(c));
    if ground {
        return constants.boxed();
    }
    prop_oneof![
        3 => constants,
        2 => prop::sample::select(vec!["X", "Y", "Z"]).prop_map(|v| Term::variable(v)),
        1 => Just(Term::Anonymous),
    ]
    .boxed()
}

fn fact_strategy(ground: bool) -> impl Strategy<Value = Predicate> {
    (
        prop::sample::select(vec!["on", "clear", "above"]),
        prop::collection::vec(term_strategy(ground), 1..=2),
    )
        .prop_map(|(name, args)| Predicate::new(name, args))
}

fn facts(ground: bool) -> impl Strategy<Value = BTreeSet<Predicate>> {
    prop::collection::btree_set(fact_strategy(ground), 0..5)
}

/// Grounds `?X ?Y ?Z` to the first three objects (repeats allowed) and
/// every anonymous placeholder to the fourth.
fn instantiate(fact: &Predicate, objects: &[&str; 4]) -> Predicate {
    let args = fact
        .args()
        .iter()
        .map(|term| match term.variable_name() {
            Some("X") => Term::constant(objects[0]),
            Some("Y") => Term::constant(objects[1]),
            Some("Z") => Term::constant(objects[2]),
            _ if term.is_anonymous() => Term::constant(objects[3]),
            _ => term.clone(),
        })
        .collect();
    fact.with_args(args)
}

fn distribution(weights: &[f64]) -> ProbabilityDistribution<usize> {
    let mut dist = ProbabilityDistribution::new();
    for (i, w) in weights.iter().enumerate() {
        dist.add_with_weight(i, *w);
    }
    dist
}

proptest! {
    #[test]
    fn normalize_sums_to_one(weights in prop::collection::vec(0.0f64..100.0, 0..12)) {
        let mut dist = distribution(&weights);
        dist.normalize();
        if !dist.is_empty() {
            prop_assert!((dist.total() - 1.0).abs() <= EPSILON);
        }
    }

    #[test]
    fn kl_size_is_bounded(weights in prop::collection::vec(0.0f64..100.0, 0..12)) {
        let mut dist = distribution(&weights);
        dist.normalize();
        let kl = dist.kl_size();
        if dist.len() <= 1 {
            prop_assert!(kl.abs() < f64::EPSILON);
        } else {
            #[allow(clippy::cast_precision_loss)]
            let size = dist.len() as f64;
            prop_assert!(kl >= 1.0 - 1e-9);
            prop_assert!(kl <= size + 1e-9);
        }
    }

    #[test]
    fn generalization_never_grows(old in facts(false), new in facts(true)) {
        let outcome = Unifier::new().unify(&old, &new);
        prop_assert!(outcome.facts.len() <= old.len());
        if outcome.verdict == UnificationVerdict::Failed {
            prop_assert!(outcome.facts.is_empty());
        }
    }

    #[test]
    fn unification_is_deterministic(old in facts(false), new in facts(true)) {
        let unifier = Unifier::new();
        prop_assert_eq!(unifier.unify(&old, &new), unifier.unify(&old, &new));
    }

    #[test]
    fn instances_unify_unchanged(
        old in facts(false),
        objects in prop::array::uniform4(prop::sample::select(vec!["a", "b", "c", "floor"])),
        extra in facts(true),
    ) {
        let mut new: BTreeSet<Predicate> = old.iter().map(|fact| instantiate(fact, &objects)).collect();
        new.extend(extra);
        let outcome = Unifier::new().unify(&old, &new);
        prop_assert_eq!(outcome.verdict, UnificationVerdict::Unchanged);
        prop_assert_eq!(outcome.facts, old);
        prop_assert_eq!(outcome.cost, 0);
    }

    #[test]
    fn ranges_only_widen(values in prop::collection::vec(-50i32..50, 2..6)) {
        let unifier = Unifier::new();
        let fact = |v: i32| Predicate::new("height", vec![Term::constant("a"), Term::number(f64::from(v))]);
        let mut old = BTreeSet::from([fact(values[0])]);
        let mut low = f64::from(values[0]);
        let mut high = low;
        for v in &values[1..] {
            let outcome = unifier.unify(&old, &BTreeSet::from([fact(*v)]));
            let v = f64::from(*v);
            low = low.min(v);
            high = high.max(v);
            let fact = outcome.facts.iter().next().cloned();
            prop_assert!(fact.is_some());
            old = outcome.facts;
            let Some(fact) = fact else { break };
            let term = &fact.args()[1];
            match term.bounds() {
                Some(bounds) => prop_assert_eq!(bounds, (low, high)),
                None => prop_assert_eq!(term.as_number(), Some(low)),
            }
        }
    }

    #[test]
    fn sampling_is_reproducible(weights in prop::collection::vec(0.01f64..10.0, 1..8), seed in any::<u64>()) {
        let mut dist = distribution(&weights);
        dist.normalize();
        let draw = |seed: u64| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            (0..16).map(|_| dist.sample(&mut rng, false).copied()).collect::<Vec<_>>()
        };
        prop_assert_eq!(draw(seed), draw(seed));
    }
}
