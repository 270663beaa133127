use super::*;
use crate::IndexSizes;

#[test]
fn incremental_apply_is_idempotent() {
    let test = TestConfig::default();
    let mk = || {
        mk_data(
            ["10.0.0.5"],
            [
                ("10.0.0.5:8080", TargetInfo::named(80, "http")),
                ("10.0.0.5:8080", TargetInfo::named(80, "http")),
            ],
            [mk_metadata("dep-0", "pod-0", "app", "c0")],
        )
    };

    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(mk()) },
        ApplyMode::Incremental,
    );
    let once = (
        test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")),
        test.store.lookup_by_endpoint(&ep("10.0.0.5:9999")),
        test.store.lookup_by_container_id("c0"),
        test.store.sizes(),
    );

    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(mk()) },
        ApplyMode::Incremental,
    );
    let twice = (
        test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")),
        test.store.lookup_by_endpoint(&ep("10.0.0.5:9999")),
        test.store.lookup_by_container_id("c0"),
        test.store.sizes(),
    );

    assert_eq!(once, twice);
    assert_eq!(once.0, vec![mk_result("dep-0", [80], ["http"])]);
}

#[test]
fn incremental_apply_extends_deployment() {
    let test = TestConfig::default();
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                None,
                [("10.0.0.5:8080", TargetInfo::named(80, "http"))],
                None,
            )),
        },
        ApplyMode::Incremental,
    );
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                None,
                [("10.0.0.5:8080", TargetInfo::named(9090, "admin"))],
                None,
            )),
        },
        ApplyMode::Incremental,
    );

    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")),
        vec![mk_result("dep-0", [80, 9090], ["admin", "http"])],
    );
}

#[test]
fn incremental_apply_ignores_missing_batches() {
    let test = TestConfig::default();
    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(mk_data(["10.0.0.5"], None, None)) },
        ApplyMode::Incremental,
    );
    test.apply(
        hashmap! { DeploymentId::from("dep-0") => None },
        ApplyMode::Incremental,
    );

    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:80")),
        vec![mk_result("dep-0", [80], None)],
    );
}

#[test]
fn replace_discards_prior_state() {
    let test = TestConfig::default();
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                ["10.0.0.5"],
                [("10.0.0.5:8080", TargetInfo::named(80, "http"))],
                [mk_metadata("dep-0", "pod-0", "app", "c0")],
            )),
            DeploymentId::from("dep-1") => Some(mk_data(
                ["10.0.0.6"],
                [("10.0.0.6:8080", TargetInfo::new(8080))],
                [mk_metadata("dep-1", "pod-1", "app", "c1")],
            )),
        },
        ApplyMode::Replace,
    );

    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                ["10.0.0.7"],
                [("10.0.0.7:9090", TargetInfo::named(9090, "metrics"))],
                [mk_metadata("dep-0", "pod-2", "app", "c2")],
            )),
        },
        ApplyMode::Replace,
    );

    // Nothing of dep-0's prior state remains.
    assert_eq!(test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")), vec![]);
    assert_eq!(test.store.lookup_by_endpoint(&ep("10.0.0.5:1")), vec![]);
    assert_eq!(test.store.lookup_by_container_id("c0"), None);

    // The new state is visible.
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.7:9090")),
        vec![mk_result("dep-0", [9090], ["metrics"])],
    );
    assert_eq!(
        test.store.lookup_by_container_id("c2"),
        Some(mk_metadata("dep-0", "pod-2", "app", "c2")),
    );

    // dep-1 is untouched.
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.6:8080")),
        vec![mk_result("dep-1", [8080], None)],
    );
    assert_eq!(
        test.store.lookup_by_container_id("c1"),
        Some(mk_metadata("dep-1", "pod-1", "app", "c1")),
    );

    assert_eq!(
        test.store.sizes(),
        IndexSizes {
            ips: 2,
            endpoints: 2,
            containers: 2,
            deployments: 2,
            pending_callbacks: 0,
        }
    );
}

#[test]
fn replace_purges_before_merging() {
    let test = TestConfig::default();
    test.apply(
        vec![
            (DeploymentId::from("dep-0"), Some(mk_data(["10.0.0.5"], None, None))),
            (DeploymentId::from("dep-1"), Some(mk_data(["10.0.0.6"], None, None))),
        ],
        ApplyMode::Replace,
    );

    // Each deployment takes over the other's address. Had dep-1 been purged after dep-0's batch
    // was merged, the outcome would depend on the order of the updates.
    test.apply(
        vec![
            (DeploymentId::from("dep-0"), Some(mk_data(["10.0.0.6"], None, None))),
            (DeploymentId::from("dep-1"), Some(mk_data(["10.0.0.5"], None, None))),
        ],
        ApplyMode::Replace,
    );

    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:80")),
        vec![mk_result("dep-1", [80], None)],
    );
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.6:80")),
        vec![mk_result("dep-0", [80], None)],
    );
}

#[test]
fn purge_only_removes_deployment() {
    let test = TestConfig::default();
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                ["10.0.0.5"],
                [("10.0.0.5:8080", TargetInfo::named(80, "http"))],
                [mk_metadata("dep-0", "pod-0", "app", "c0")],
            )),
        },
        ApplyMode::Incremental,
    );

    test.apply(
        hashmap! { DeploymentId::from("dep-0") => None },
        ApplyMode::Replace,
    );

    assert_eq!(test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")), vec![]);
    assert_eq!(test.store.lookup_by_container_id("c0"), None);
    assert_eq!(test.store.sizes(), IndexSizes::default());
}

#[test]
fn purge_of_unknown_deployment_is_a_noop() {
    let test = TestConfig::default();
    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(mk_data(["10.0.0.5"], None, None)) },
        ApplyMode::Incremental,
    );
    let before = test.store.sizes();

    test.apply(
        hashmap! { DeploymentId::from("dep-1") => None },
        ApplyMode::Replace,
    );

    assert_eq!(test.store.sizes(), before);
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:80")),
        vec![mk_result("dep-0", [80], None)],
    );
}

#[test]
fn empty_batch_leaves_no_residue() {
    let test = TestConfig::default();
    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(mk_data(["10.0.0.5"], None, None)) },
        ApplyMode::Incremental,
    );

    test.apply(
        hashmap! { DeploymentId::from("dep-0") => Some(EntityData::default()) },
        ApplyMode::Replace,
    );

    assert_eq!(test.store.sizes(), IndexSizes::default());
}

#[test]
fn shared_addresses_are_released_by_the_last_owner() {
    let test = TestConfig::default();
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                ["10.0.0.5"],
                [("10.0.0.5:8080", TargetInfo::new(80))],
                None,
            )),
            DeploymentId::from("dep-1") => Some(mk_data(
                ["10.0.0.5"],
                [("10.0.0.5:8080", TargetInfo::new(81))],
                None,
            )),
        },
        ApplyMode::Incremental,
    );
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")),
        vec![mk_result("dep-0", [80], None), mk_result("dep-1", [81], None)],
    );

    test.apply(
        hashmap! { DeploymentId::from("dep-0") => None },
        ApplyMode::Replace,
    );
    assert_eq!(
        test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")),
        vec![mk_result("dep-1", [81], None)],
    );
    assert_eq!(test.store.sizes().ips, 1);
    assert_eq!(test.store.sizes().endpoints, 1);

    test.apply(
        hashmap! { DeploymentId::from("dep-1") => None },
        ApplyMode::Replace,
    );
    assert_eq!(test.store.lookup_by_endpoint(&ep("10.0.0.5:8080")), vec![]);
    assert_eq!(test.store.sizes(), IndexSizes::default());
}

#[test]
fn later_container_update_wins() {
    let test = TestConfig::default();
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                None,
                None,
                [mk_metadata("dep-0", "pod-0", "app", "c0")],
            )),
        },
        ApplyMode::Incremental,
    );
    test.apply(
        hashmap! {
            DeploymentId::from("dep-0") => Some(mk_data(
                None,
                None,
                [mk_metadata("dep-0", "pod-0", "sidecar", "c0")],
            )),
        },
        ApplyMode::Incremental,
    );

    assert_eq!(
        test.store.lookup_by_container_id("c0"),
        Some(mk_metadata("dep-0", "pod-0", "sidecar", "c0")),
    );
    assert_eq!(test.store.sizes().containers, 1);
}

/// When one update lists the same container under several deployments, the last one in the
/// caller's order owns it.
#[test]
fn duplicate_container_last_deployment_wins() {
    let test = TestConfig::default();
    test.apply(
        vec![
            (
                DeploymentId::from("dep-0"),
                Some(mk_data(
                    ["10.0.0.5"],
                    None,
                    [mk_metadata("dep-0", "pod-0", "app", "c0")],
                )),
            ),
            (
                DeploymentId::from("dep-1"),
                Some(mk_data(
                    None,
                    None,
                    [mk_metadata("dep-1", "pod-1", "app", "c0")],
                )),
            ),
        ],
        ApplyMode::Incremental,
    );
    assert_eq!(
        test.store.lookup_by_container_id("c0"),
        Some(mk_metadata("dep-1", "pod-1", "app", "c0")),
    );

    // Purging the previous owner does not remove the container.
    test.apply(
        hashmap! { DeploymentId::from("dep-0") => None },
        ApplyMode::Replace,
    );
    assert_eq!(
        test.store.lookup_by_container_id("c0"),
        Some(mk_metadata("dep-1", "pod-1", "app", "c0")),
    );

    // A deployment that loses its only container no longer owns anything.
    test.apply(
        vec![(
            DeploymentId::from("dep-2"),
            Some(mk_data(
                None,
                None,
                [mk_metadata("dep-2", "pod-2", "app", "c0")],
            )),
        )],
        ApplyMode::Incremental,
    );
    assert_eq!(test.store.sizes().deployments, 1);
}

/// Churns a handful of deployments over a small address space, checking that the indices stay
/// consistent after every update.
#[test]
fn churn_preserves_consistency() {
    const IPS: [&str; 4] = ["10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4"];
    const ENDPOINTS: [&str; 3] = ["10.0.0.1:80", "10.0.0.2:80", "10.0.0.1:443"];

    let test = TestConfig::default();
    let deployments = ["dep-0", "dep-1", "dep-2"];

    for i in 0..120usize {
        let deployment = deployments[i % deployments.len()];
        let batch = if i % 7 == 0 {
            None
        } else {
            let container = format!("c{}", i % 5);
            Some(mk_data(
                [IPS[i % IPS.len()], IPS[(i / 2) % IPS.len()]],
                [(
                    ENDPOINTS[i % ENDPOINTS.len()],
                    TargetInfo::new(8000 + (i % 3) as u16),
                )],
                [mk_metadata(deployment, "pod", "app", &container)],
            ))
        };
        let mode = if i % 3 == 0 {
            ApplyMode::Replace
        } else {
            ApplyMode::Incremental
        };
        test.apply(Some((DeploymentId::from(deployment), batch)), mode);
    }

    for deployment in deployments {
        test.apply(
            Some((DeploymentId::from(deployment), None)),
            ApplyMode::Replace,
        );
    }
    assert_eq!(test.store.sizes(), IndexSizes::default());
}
