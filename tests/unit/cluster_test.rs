//! Tests for shard identity resolution

use std::collections::HashMap;

use shardkeeper::core::cluster::{CLUSTER_ID_ENV, SHARD_COUNT_ENV, SHARD_INDEX_ENV};
use shardkeeper::core::{AutomationError, ClusterCoordinator, ShardDescriptor};

fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_primary_is_shard_zero() {
    let coordinator = ClusterCoordinator::from_lookup(lookup(&[
        (SHARD_INDEX_ENV, "0"),
        (SHARD_COUNT_ENV, "4"),
    ]))
    .unwrap();
    assert!(coordinator.is_primary());
    assert_eq!(coordinator.cluster_id(), "cluster-0");
}

#[test]
fn test_secondary_shard_not_primary() {
    let coordinator = ClusterCoordinator::from_lookup(lookup(&[
        (SHARD_INDEX_ENV, "3"),
        (SHARD_COUNT_ENV, "4"),
        (CLUSTER_ID_ENV, "eu-west-3"),
    ]))
    .unwrap();
    assert!(!coordinator.is_primary());
    assert_eq!(coordinator.cluster_id(), "eu-west-3");
    assert_eq!(coordinator.shard().shard_count, 4);
}

#[test]
fn test_missing_shard_index_is_configuration_error() {
    let err = ClusterCoordinator::from_lookup(lookup(&[(SHARD_COUNT_ENV, "2")])).unwrap_err();
    assert!(matches!(err, AutomationError::Configuration(_)));
}

#[test]
fn test_malformed_shard_count_is_configuration_error() {
    let err = ClusterCoordinator::from_lookup(lookup(&[
        (SHARD_INDEX_ENV, "0"),
        (SHARD_COUNT_ENV, "many"),
    ]))
    .unwrap_err();
    assert!(matches!(err, AutomationError::Configuration(_)));
}

#[test]
fn test_index_out_of_range_rejected() {
    assert!(ShardDescriptor::new(2, 2, "c").is_err());
    assert!(ShardDescriptor::new(0, 0, "c").is_err());
    assert!(ShardDescriptor::new(0, 1, "  ").is_err());
    assert!(ShardDescriptor::new(1, 2, "c").is_ok());
}

#[test]
fn test_exactly_one_primary_across_shards() {
    let primaries = (0..8)
        .map(|i| ClusterCoordinator::new(ShardDescriptor::new(i, 8, format!("c-{i}")).unwrap()))
        .filter(ClusterCoordinator::is_primary)
        .count();
    assert_eq!(primaries, 1);
}
