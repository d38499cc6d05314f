use pyro_profiler::Vertical;
use std::collections::BTreeSet;

macro_rules! walk {
    ($($name:ident: $scope:expr,)*) => {
        $(
        #[test]
        fn $name() {
            let columns: Vec<usize> = $scope;
            check(&Vertical::new(&columns));
        }
        )*
    }
}

walk! {
    single_column: vec![0],
    dense_3: (0..3).collect(),
    dense_5: (0..5).collect(),
    dense_7: (0..7).collect(),
    sparse_low: vec![1, 4, 9, 15],
    across_words: vec![2, 63, 64, 100],
    spilled: vec![0, 70, 128, 129, 191, 200],
}

fn binomial(n: usize, k: usize) -> usize {
    (0..k).fold(1, |acc, i| acc * (n - i) / (i + 1))
}

/// Climbs from the empty vertical to `scope` one layer at a time, checking how each step
/// relates to the one before.
fn check(scope: &Vertical) {
    let n = scope.arity();
    assert_eq!(scope.children_within(scope).count(), 0);
    assert_eq!(Vertical::empty().parents().count(), 0);

    let mut layer: BTreeSet<Vertical> = BTreeSet::new();
    layer.insert(Vertical::empty());
    for arity in 0..=n {
        assert_eq!(layer.len(), binomial(n, arity), "layer {} of {:?}", arity, scope);

        let mut next = BTreeSet::new();
        for vertical in layer.iter() {
            assert_eq!(vertical.arity(), arity);
            assert!(vertical.is_subset(scope));

            let children: Vec<Vertical> = vertical.children_within(scope).collect();
            assert_eq!(children.len(), n - arity);
            for child in children {
                let added = child.without(vertical);
                assert_eq!(added.arity(), 1, "{:?} -> {:?}", vertical, child);
                assert!(child.is_subset(scope));
                assert!(added.iter().all(|c| scope.contains(c) && !vertical.contains(c)));
                assert!(child.parents().any(|p| &p == vertical));
                next.insert(child);
            }

            for parent in vertical.parents() {
                assert_eq!(parent.arity() + 1, arity);
                assert_eq!(parent.union(&vertical.without(&parent)), *vertical);
                assert!(parent.children_within(scope).any(|c| &c == vertical));
            }
        }

        if arity == n {
            assert!(next.is_empty());
            assert_eq!(layer.iter().next(), Some(scope));
        }
        layer = next;
    }
}
