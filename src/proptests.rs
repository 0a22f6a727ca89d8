use super::*;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::{BTreeSet, HashSet};

fn validate_tree<S: Storage>(t: &Tree<S>) {
    let arena = t.arena();
    let mut seen: HashSet<Offset> = HashSet::new();
    let mut stack: Vec<Offset> = vec![t.root()];
    let mut terminal = 0usize;

    while let Some(off) = stack.pop() {
        assert!(seen.insert(off), "node {off:?} reachable through two edges");
        assert!(off.as_usize() >= arena.reserved(), "offset inside reserved prefix");
        assert_eq!(off.as_usize() % arena.alignment(), 0, "misaligned node");
        assert!(off.as_usize() + 4 <= arena.used(), "node past the cursor");

        let node = arena.node(off);
        assert!(!node.is_dead(), "dead node reachable at {off:?}");
        assert!(node.capacity() <= 256);
        assert!(off.as_usize() + node.size() <= arena.used());
        if off != t.root() {
            assert!(!node.is_empty(), "only the root may have an empty span");
        }

        let stats = node.stats();
        assert_eq!(stats.capacity, stats.span + stats.spare);
        if let (Some(min), Some(max)) = (node.min_index(), node.max_index()) {
            assert!(min <= max);
            // Span ends are always occupied: spans only grow to fit a byte.
            assert!(!node.try_get(min).is_empty(), "unused min index");
            assert!(!node.try_get(max).is_empty(), "unused max index");
        }

        for (_, slot) in node.slots() {
            if slot.is_terminal() {
                terminal += 1;
            }
            if let Some(child) = slot.child() {
                stack.push(child);
            }
        }
    }

    assert_eq!(terminal, t.len(), "terminal edge count must match Tree::len");
    for region in arena.dead_regions() {
        assert!(
            !seen.contains(&region.offset),
            "retired node {:?} still reachable",
            region.offset
        );
    }
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 3)]
    Insert(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    Find(#[proptest(strategy = "key_strategy()")] Vec<u8>),
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    // A narrow alphabet forces shared prefixes and prefix keys; the wide
    // one exercises span growth in both directions.
    prop_oneof![
        prop::collection::vec(prop_oneof![Just(0u8), Just(b'a'), Just(b'b'), Just(255u8)], 1..=8),
        prop::collection::vec(any::<u8>(), 1..=24),
    ]
}

fn growth_strategy() -> impl Strategy<Value = GrowthPolicy> {
    (0u8..=4, 0u8..=100, 0u8..=4).prop_map(|(initial_spare, spare_percent, min_spare)| {
        GrowthPolicy {
            initial_spare,
            spare_percent,
            min_spare,
        }
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(
        ops in prop::collection::vec(any::<Op>(), 0..=1000),
        growth in growth_strategy(),
        root_spare in 0u8..=32,
    ) {
        let config = TreeConfig::default()
            .with_capacity(4 << 20)
            .with_root_spare(root_spare)
            .with_growth(growth);
        let mut t = Tree::with_config(config).unwrap();
        let mut m: BTreeSet<Vec<u8>> = BTreeSet::new();

        for op in ops {
            match op {
                Op::Insert(key) => {
                    let expected = if m.insert(key.clone()) { Status::Ok } else { Status::Exists };
                    prop_assert_eq!(t.insert(&key).unwrap(), expected);
                }
                Op::Find(key) => {
                    let expected = if m.contains(&key) { Status::Exists } else { Status::NotFound };
                    prop_assert_eq!(t.find(&key), expected);
                }
            }
            prop_assert_eq!(t.len(), m.len());
        }

        validate_tree(&t);
        let got: Vec<Vec<u8>> = t.keys().collect();
        let expected: Vec<Vec<u8>> = m.iter().cloned().collect();
        prop_assert_eq!(got, expected);
        prop_assert_eq!(t.max_depth(), m.iter().map(Vec::len).max().unwrap_or(0));
    }

    #[test]
    fn prop_out_of_memory_is_atomic(
        keys in prop::collection::vec(key_strategy(), 1..=200),
        capacity in 64usize..=2048,
    ) {
        let config = TreeConfig::default().with_capacity(capacity).with_root_spare(4);
        let mut t = Tree::with_config(config).unwrap();
        let mut m: BTreeSet<Vec<u8>> = BTreeSet::new();

        for key in keys {
            let before: Vec<Vec<u8>> = t.keys().collect();
            match t.insert(&key) {
                Ok(Status::Ok) => prop_assert!(m.insert(key)),
                Ok(status) => {
                    prop_assert_eq!(status, Status::Exists);
                    prop_assert!(m.contains(&key));
                }
                Err(err) => {
                    prop_assert!(err.is_out_of_memory());
                    let after: Vec<Vec<u8>> = t.keys().collect();
                    prop_assert_eq!(after, before);
                    prop_assert_eq!(t.find(&key), Status::NotFound);
                }
            }
        }

        validate_tree(&t);
        let got: Vec<Vec<u8>> = t.keys().collect();
        let expected: Vec<Vec<u8>> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
        prop_assert!(t.arena().used() <= capacity);
    }

    #[test]
    fn prop_prefix_iteration_matches_filter(
        keys in prop::collection::vec(key_strategy(), 0..=200),
        prefix in prop::collection::vec(prop_oneof![Just(0u8), Just(b'a'), Just(b'b')], 0..=3),
    ) {
        let mut t = Tree::new();
        for key in &keys {
            t.insert(key).unwrap();
        }
        let all: BTreeSet<Vec<u8>> = keys.into_iter().collect();
        let expected: Vec<Vec<u8>> = all.into_iter().filter(|k| k.starts_with(&prefix)).collect();
        let got: Vec<Vec<u8>> = t.keys_with_prefix(&prefix).collect();
        prop_assert_eq!(got, expected);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys: Vec<Vec<u8>> = vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"z".to_vec(),
        b"aa".to_vec(),
        b"ab".to_vec(),
        b"ba".to_vec(),
        b"aab".to_vec(),
    ];
    let mut expected = keys.clone();
    expected.sort();

    for growth in [GrowthPolicy::exact(), GrowthPolicy::default()] {
        let config = TreeConfig::default()
            .with_capacity(64 * 1024)
            .with_root_spare(0)
            .with_growth(growth);
        for_each_permutation(&keys, |perm| {
            let mut t = Tree::with_config(config).unwrap();
            for k in &perm {
                assert_eq!(t.insert(k).unwrap(), Status::Ok);
            }
            for k in &perm {
                assert_eq!(t.insert(k).unwrap(), Status::Exists);
            }

            validate_tree(&t);
            let got: Vec<Vec<u8>> = t.keys().collect();
            assert_eq!(got, expected, "insert order {perm:?}");
        });
    }
}

#[test]
fn randomized_against_btreeset() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let mut rng = StdRng::seed_from_u64(1);
    let mut t = Tree::with_config(TreeConfig::default().with_capacity(16 << 20)).unwrap();
    let mut m: BTreeSet<Vec<u8>> = BTreeSet::new();

    for _ in 0..20_000 {
        let len = rng.gen_range(1..33);
        let mut key = vec![0u8; len];
        for b in &mut key {
            // Skewed bytes so keys share prefixes.
            *b = if rng.gen_bool(0.7) {
                rng.gen_range(b'a'..=b'd')
            } else {
                rng.gen()
            };
        }
        let expected = if m.insert(key.clone()) {
            Status::Ok
        } else {
            Status::Exists
        };
        assert_eq!(t.insert(&key).unwrap(), expected);
    }

    validate_tree(&t);
    assert_eq!(t.len(), m.len());
    let got: Vec<Vec<u8>> = t.keys().collect();
    let expected: Vec<Vec<u8>> = m.iter().cloned().collect();
    assert_eq!(got, expected);

    let stats = t.stats();
    assert_eq!(stats.leaf_edges + stats.terminal_edges, t.len());
    assert!(stats.arena.dead_bytes < stats.arena.bytes_in_use);
}
