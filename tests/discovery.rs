use pyro_profiler::{
    ColumnLayoutRelation, Configuration, PartialFd, PartialKey, Profiler, ProfilingError, Vertical,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, HashMap};

type Rows = Vec<Vec<Option<String>>>;

/// A random table where some columns are functions of others, so it has a mix of exact,
/// approximate and absent dependencies.
fn random_table(seed: u64, columns: usize, rows: usize) -> Rows {
    let mut rng = StdRng::seed_from_u64(seed);
    let domains: Vec<u32> = (0..columns)
        .map(|_| [2, 3, 4, 7, 40][rng.random_range(0..5)])
        .collect();
    (0..rows)
        .map(|_| {
            let mut row: Vec<Option<u32>> = Vec::with_capacity(columns);
            for (c, &domain) in domains.iter().enumerate() {
                let value = if c >= 2 && rng.random_bool(0.3) {
                    // Mostly determined by the two previous columns, with some noise.
                    match (row[c - 1], row[c - 2]) {
                        (Some(a), Some(b)) if rng.random_bool(0.9) => Some((a * 7 + b) % domain),
                        _ => Some(rng.random_range(0..domain)),
                    }
                } else if rng.random_bool(0.05) {
                    None
                } else {
                    Some(rng.random_range(0..domain))
                };
                row.push(value);
            }
            row.into_iter()
                .map(|v| v.map(|v| v.to_string()))
                .collect()
        })
        .collect()
}

fn relation(rows: &Rows, columns: usize, null_equals_null: bool) -> ColumnLayoutRelation {
    let headers: Vec<String> = (0..columns).map(|c| format!("c{}", c)).collect();
    ColumnLayoutRelation::from_rows("random", headers, rows.clone(), null_equals_null).unwrap()
}

fn agree(a: &Option<String>, b: &Option<String>, null_equals_null: bool) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        (None, None) => null_equals_null,
        _ => false,
    }
}

/// Counts violating pairs directly from the rows: pairs agreeing on `lhs`, and, for FDs,
/// disagreeing on `rhs`.
fn brute_error(rows: &Rows, lhs: &Vertical, rhs: Option<usize>, null_equals_null: bool) -> f64 {
    let n = rows.len() as u64;
    let total = n * n.saturating_sub(1) / 2;
    if total == 0 {
        return 0.0;
    }
    let mut violations = 0u64;
    for i in 0..rows.len() {
        for j in i + 1..rows.len() {
            let on_lhs = lhs
                .iter()
                .all(|c| agree(&rows[i][c], &rows[j][c], null_equals_null));
            let violated = match rhs {
                None => on_lhs,
                Some(r) => on_lhs && !agree(&rows[i][r], &rows[j][r], null_equals_null),
            };
            if violated {
                violations += 1;
            }
        }
    }
    violations as f64 / total as f64
}

fn subsets(scope: &Vertical) -> Vec<Vertical> {
    let columns: Vec<usize> = scope.iter().collect();
    (0u32..1 << columns.len())
        .map(|bits| {
            columns
                .iter()
                .enumerate()
                .filter(|(i, _)| bits & (1 << i) != 0)
                .map(|(_, &c)| c)
                .collect()
        })
        .collect()
}

fn brute_minimal(
    rows: &Rows,
    scope: &Vertical,
    rhs: Option<usize>,
    max_error: f64,
    max_lhs: usize,
    null_equals_null: bool,
) -> BTreeSet<Vertical> {
    let holds: HashMap<Vertical, bool> = subsets(scope)
        .into_iter()
        .map(|v| {
            let satisfied = brute_error(rows, &v, rhs, null_equals_null) <= max_error;
            (v, satisfied)
        })
        .collect();
    holds
        .iter()
        .filter(|(v, &satisfied)| {
            satisfied
                && (max_lhs == 0 || v.arity() <= max_lhs)
                && v.parents().all(|p| !holds[&p])
        })
        .map(|(v, _)| v.clone())
        .collect()
}

type Found = (BTreeSet<Vertical>, BTreeSet<(Vertical, usize)>);

fn expected(rows: &Rows, columns: usize, config: &Configuration) -> Found {
    let all: Vertical = (0..columns).collect();
    let null_eq = config.is_null_equal_null;
    let keys = brute_minimal(rows, &all, None, config.max_ucc_error, config.max_lhs, null_eq);
    let mut fds = BTreeSet::new();
    for rhs in 0..columns {
        let scope = all.without_column(rhs);
        let max_error = config.max_fd_error;
        for lhs in brute_minimal(rows, &scope, Some(rhs), max_error, config.max_lhs, null_eq) {
            fds.insert((lhs, rhs));
        }
    }
    (keys, fds)
}

fn found(keys: &[PartialKey], fds: &[PartialFd]) -> Found {
    (
        keys.iter().map(|k| k.vertical.clone()).collect(),
        fds.iter().map(|fd| (fd.lhs.clone(), fd.rhs)).collect(),
    )
}

#[test]
fn matches_exhaustive_enumeration() {
    let settings = [
        (0.0, 0, "error", "coin", "default", 10_000),
        (0.02, 0, "arity", "allcaching", "lru", 8),
        (0.1, 0, "error", "entropy", "size", 0),
        (0.25, 2, "arity", "nocaching", "default", 20),
        (0.05, 3, "error", "coin", "lru", 1),
    ];
    for seed in 0..6u64 {
        let columns = 3 + (seed as usize % 4);
        let rows = random_table(seed, columns, 12 + 7 * seed as usize);
        for &(max_error, max_lhs, order, caching, eviction, sample_size) in settings.iter() {
            for null_equals_null in [true, false] {
                let mut config = Configuration::default();
                config.seed = seed;
                config.max_ucc_error = max_error;
                config.max_fd_error = max_error;
                config.max_lhs = max_lhs;
                config.launch_pad_order = order.to_owned();
                config.caching_method = caching.to_owned();
                config.eviction_method = eviction.to_owned();
                config.sample_size = sample_size;
                config.is_null_equal_null = null_equals_null;

                let relation = relation(&rows, columns, null_equals_null);
                let result = Profiler::new(config.clone()).execute(&relation).unwrap();
                let context = format!(
                    "seed {} error {} lhs {} order {} caching {} eviction {} null_eq {}",
                    seed, max_error, max_lhs, order, caching, eviction, null_equals_null
                );

                assert_eq!(
                    found(&result.keys, &result.fds),
                    expected(&rows, columns, &config),
                    "{}",
                    context
                );

                // Every dependency is reported once, with its exact error.
                assert_eq!(result.keys.len(), result.diagnostics.num_keys, "{}", context);
                assert_eq!(result.fds.len(), result.diagnostics.num_fds, "{}", context);
                for key in result.keys.iter() {
                    let error = brute_error(&rows, &key.vertical, None, null_equals_null);
                    assert_eq!(key.error, error, "{}", context);
                }
                for fd in result.fds.iter() {
                    let error = brute_error(&rows, &fd.lhs, Some(fd.rhs), null_equals_null);
                    assert_eq!(fd.error, error, "{}", context);
                }
            }
        }
    }
}

#[test]
fn repeated_runs_are_identical() {
    let rows = random_table(42, 6, 50);
    let relation = relation(&rows, 6, true);
    let mut config = Configuration::default();
    config.max_ucc_error = 0.05;
    config.max_fd_error = 0.05;
    config.sample_size = 30;
    config.seed = 9;

    let first = Profiler::new(config.clone()).execute(&relation).unwrap();
    let second = Profiler::new(config.clone()).execute(&relation).unwrap();
    assert_eq!(first.keys, second.keys);
    assert_eq!(first.fds, second.fds);
    assert_eq!(first.diagnostics.checksum, second.diagnostics.checksum);
    assert_eq!(
        first.diagnostics.error_calculations,
        second.diagnostics.error_calculations
    );

    // A different seed may take another path, but must find the same dependencies.
    config.seed = 10;
    let other = Profiler::new(config).execute(&relation).unwrap();
    assert_eq!(
        found(&first.keys, &first.fds),
        found(&other.keys, &other.fds)
    );
    assert_eq!(first.diagnostics.checksum, other.diagnostics.checksum);
}

fn table(rows: &[[&str; 3]]) -> ColumnLayoutRelation {
    ColumnLayoutRelation::from_rows(
        "t",
        vec!["A", "B", "C"],
        rows.iter().map(|row| row.map(Some)),
        true,
    )
    .unwrap()
}

fn exact_config() -> Configuration {
    let mut config = Configuration::default();
    config.max_ucc_error = 0.0;
    config.max_fd_error = 0.0;
    config
}

#[test]
fn unique_column_is_a_key_and_determines_the_rest() {
    let relation = table(&[
        ["1", "x", "p"],
        ["2", "x", "q"],
        ["3", "y", "p"],
        ["4", "y", "p"],
    ]);
    let result = Profiler::new(exact_config()).execute(&relation).unwrap();
    let (keys, fds) = found(&result.keys, &result.fds);

    let a = Vertical::single(0);
    assert!(keys.contains(&a));
    assert!(fds.contains(&(a.clone(), 1)));
    // A is unique, so it determines C as well; nothing else determines C.
    assert!(fds.contains(&(a.clone(), 2)));
    assert!(!fds.iter().any(|(lhs, rhs)| *rhs == 2 && *lhs == Vertical::single(1)));
    for (lhs, rhs) in fds.iter() {
        assert!(!lhs.contains(*rhs));
    }
}

#[test]
fn constant_column_is_not_a_key() {
    let relation = table(&[
        ["1", "k", "p"],
        ["2", "k", "p"],
        ["2", "k", "q"],
    ]);
    let mut config = exact_config();
    config.caching_method = "entropy".to_owned();
    let result = Profiler::new(config).execute(&relation).unwrap();
    let (keys, fds) = found(&result.keys, &result.fds);
    assert_eq!(keys, BTreeSet::from([Vertical::new(&[0, 2])]));
    // The constant column is determined by the empty set.
    assert!(fds.contains(&(Vertical::empty(), 1)));
}

#[test]
fn single_row_makes_everything_a_key() {
    let relation = table(&[["1", "k", "p"]]);
    let result = Profiler::new(exact_config()).execute(&relation).unwrap();
    let (keys, fds) = found(&result.keys, &result.fds);
    assert_eq!(keys, BTreeSet::from([Vertical::empty()]));
    assert_eq!(
        fds,
        (0..3).map(|rhs| (Vertical::empty(), rhs)).collect::<BTreeSet<_>>()
    );
}

#[test]
fn unknown_error_measure_fails_before_discovery() {
    let relation = table(&[["1", "k", "p"], ["2", "k", "q"]]);
    let mut config = Configuration::default();
    config.ucc_error_measure = "unknown".to_owned();
    config.is_find_keys = false;

    let mut reported = 0;
    let outcome = Profiler::new(config).execute_with(
        &relation,
        |_| reported += 1,
        |_| {},
    );
    assert!(matches!(
        outcome,
        Err(ProfilingError::UnknownErrorMeasure { target: "key", .. })
    ));
    assert_eq!(reported, 0);
}

fn rejects(tweak: impl FnOnce(&mut Configuration), check: impl FnOnce(&ProfilingError) -> bool) {
    let relation = table(&[["1", "k", "p"]]);
    let mut config = Configuration::default();
    tweak(&mut config);
    let error = Profiler::new(config).execute(&relation).unwrap_err();
    assert!(check(&error), "{:?}", error);
}

#[test]
fn invalid_settings_are_rejected() {
    rejects(
        |c| c.launch_pad_order = "random".to_owned(),
        |e| matches!(e, ProfilingError::UnknownLaunchPadOrder(_)),
    );
    rejects(
        |c| c.eviction_method = "fifo".to_owned(),
        |e| matches!(e, ProfilingError::UnknownEvictionMethod(_)),
    );
    rejects(
        |c| c.max_fd_error = 1.5,
        |e| matches!(e, ProfilingError::InvalidParameter { name: "max_fd_error", .. }),
    );
    rejects(
        |c| c.estimate_confidence = 1.0,
        |e| matches!(e, ProfilingError::InvalidParameter { name: "estimate_confidence", .. }),
    );
    rejects(
        |c| c.caching_method_value = 2.0,
        |e| matches!(e, ProfilingError::InvalidParameter { name: "caching_method_value", .. }),
    );
}

#[test]
fn empty_relation_is_rejected() {
    let rows: Vec<Vec<Option<&str>>> = Vec::new();
    let relation =
        ColumnLayoutRelation::from_rows("empty", Vec::<String>::new(), rows, true).unwrap();
    assert_eq!(
        Profiler::default().execute(&relation).unwrap_err(),
        ProfilingError::EmptyRelation
    );
}

#[test]
fn null_policy_changes_agreement() {
    let rows = vec![
        vec![Some("1"), None],
        vec![Some("1"), None],
        vec![Some("2"), Some("x")],
    ];
    let strict =
        ColumnLayoutRelation::from_rows("t", vec!["a", "b"], rows.clone(), false).unwrap();
    let lenient = ColumnLayoutRelation::from_rows("t", vec!["a", "b"], rows, true).unwrap();

    let mut config = exact_config();
    config.is_null_equal_null = false;
    let result = Profiler::new(config.clone()).execute(&strict).unwrap();
    assert!(result.keys.iter().any(|k| k.vertical == Vertical::single(1)));

    config.is_null_equal_null = true;
    let result = Profiler::new(config).execute(&lenient).unwrap();
    assert!(!result.keys.iter().any(|k| k.vertical == Vertical::single(1)));
    assert!(result
        .fds
        .iter()
        .any(|fd| fd.lhs == Vertical::single(0) && fd.rhs == 1));
}
