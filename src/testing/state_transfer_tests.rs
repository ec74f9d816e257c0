//! State transfer tests against the scripted topology coordinator.
//!
//! These tests verify:
//! - A joiner walks through every rebalance phase and confirms each one
//! - The initial-transfer gate opens once the node is a read owner
//! - Topology id regressions are rejected
//! - Consumer and provider run concurrently; their failures are reported
//! - Outdated commands are forwarded to the new owners only

#[cfg(test)]
mod tests {
    use crate::commands::{CacheCommand, ReplicableCommand};
    use crate::config::{CacheConfig, GlobalConfig, HashConfig, StateTransferConfig};
    use crate::error::Error;
    use crate::partitioning::HashFunction;
    use crate::statetransfer::GlobalStateManager;
    use crate::testing::utils::{init_tracing, wait_for, TestNode, CACHE_NAME};
    use crate::testing::{
        InMemoryGlobalState, LocalGroup, TestTopologyCoordinator, TopologyNotification,
    };
    use crate::topology::{CacheTopology, ConsistentHashFactory, Phase, RebalancingStatus, ScopedPersistentState};
    use crate::types::{Address, CacheMode};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Barrier;

    const WAIT: Duration = Duration::from_secs(5);

    fn dist_config() -> CacheConfig {
        CacheConfig::new(CacheMode::DistSync)
            .with_num_owners(2)
            .with_num_segments(16)
            .with_state_transfer(StateTransferConfig::default().with_timeout(WAIT))
    }

    async fn joined(
        group: &Arc<LocalGroup>,
        coordinator: &Arc<TestTopologyCoordinator>,
        name: &str,
    ) -> TestNode {
        let node = TestNode::start(group, coordinator, name, dist_config()).await;
        node.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();
        node
    }

    /// A key whose write owners, seen from `topology`, satisfy `predicate`.
    fn find_key(topology: &CacheTopology, predicate: impl Fn(&[Address]) -> bool) -> String {
        (0..1000)
            .map(|i| format!("key-{}", i))
            .find(|key| {
                let owners: Vec<Address> = topology.write_owners(&[key.as_bytes()]).into_iter().collect();
                predicate(&owners)
            })
            .expect("no matching key among candidates")
    }

    #[tokio::test]
    async fn test_joiner_walks_through_rebalance_phases() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();

        let a = joined(&group, &coordinator, "a").await;
        assert_eq!(a.topology_id(), Some(0));

        let b = joined(&group, &coordinator, "b").await;
        assert!(b.manager.is_initial_transfer_complete());
        assert_eq!(b.topology_id(), Some(4));

        let confirmations: Vec<(Address, i32, i32, Option<String>)> = coordinator
            .confirmations()
            .into_iter()
            .map(|c| (c.node, c.topology_id, c.rebalance_id, c.error))
            .collect();
        assert_eq!(
            confirmations,
            vec![
                (a.address.clone(), 1, 1, None),
                (b.address.clone(), 1, 1, None),
                (a.address.clone(), 2, 1, None),
                (b.address.clone(), 2, 1, None),
                (a.address.clone(), 3, 1, None),
                (b.address.clone(), 3, 1, None),
            ]
        );

        let topology = b.manager.cache_topology().unwrap();
        assert_eq!(topology.phase(), Phase::NoRebalance);
        assert!(topology.pending_ch().is_none());
        assert_eq!(topology.current_ch().members(), &[a.address.clone(), b.address.clone()]);
        assert_eq!(a.topology_id(), Some(4));

        assert_eq!(a.consumer.updates(), vec![(0, false), (1, true), (2, true), (3, true), (4, false)]);
        assert_eq!(b.consumer.updates(), vec![(1, true), (2, true), (3, true), (4, false)]);
        assert_eq!(b.provider.updates(), b.consumer.updates());
        assert!(coordinator.dispatch_errors().is_empty());
    }

    #[tokio::test]
    async fn test_third_node_gets_two_owners_per_key() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();

        let _a = joined(&group, &coordinator, "a").await;
        let _b = joined(&group, &coordinator, "b").await;
        let c = joined(&group, &coordinator, "c").await;

        let topology = c.manager.cache_topology().unwrap();
        assert_eq!(topology.topology_id(), 8);
        assert_eq!(topology.members().len(), 3);
        for segment in 0..16 {
            assert_eq!(topology.current_ch().locate_owners_for_segment(segment).len(), 2);
        }
        assert!(!topology.current_ch().segments_for_owner(&c.address).is_empty());
        assert_eq!(c.manager.rebalancing_status().await.unwrap(), RebalancingStatus::Complete);
    }

    #[tokio::test]
    async fn test_first_topology_as_member() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();

        let a = joined(&group, &coordinator, "a").await;
        let b = TestNode::create(&group, &coordinator, "b", dist_config()).await;
        assert_eq!(b.manager.first_topology_as_member(), i32::MAX);

        b.manager.start().await.unwrap();
        b.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();

        assert_eq!(a.manager.first_topology_as_member(), 0);
        assert_eq!(b.manager.first_topology_as_member(), 1);
    }

    #[tokio::test]
    async fn test_notifications_surround_each_update() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();

        let a = joined(&group, &coordinator, "a").await;
        let b = joined(&group, &coordinator, "b").await;

        assert_eq!(
            a.notifier.events()[..2],
            [
                TopologyNotification { old_topology_id: None, topology_id: 0, pre: true },
                TopologyNotification { old_topology_id: None, topology_id: 0, pre: false },
            ]
        );

        let events = b.notifier.events();
        assert_eq!(events.len(), 8);
        for (i, pair) in events.chunks(2).enumerate() {
            let topology_id = i as i32 + 1;
            let old = if topology_id == 1 { None } else { Some(topology_id - 1) };
            assert_eq!(pair[0], TopologyNotification { old_topology_id: old, topology_id, pre: true });
            assert_eq!(pair[1], TopologyNotification { old_topology_id: old, topology_id, pre: false });
        }

        // Partition handling is told last, after the gate opened
        assert!(wait_for(|| b.partition_handling.topology_ids().len() == 4, WAIT).await);
        assert_eq!(b.partition_handling.topology_ids(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_topology_regression_is_rejected() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let a = joined(&group, &coordinator, "a").await;

        let ch = a.manager.cache_topology().unwrap().current_ch().clone();
        a.manager
            .do_topology_update(CacheTopology::stable(5, 0, ch.clone()), false)
            .await
            .unwrap();

        let err = a
            .manager
            .do_topology_update(CacheTopology::stable(3, 0, ch.clone()), false)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvariantViolation(_)));
        assert_eq!(a.topology_id(), Some(5));

        // Re-installing the same id is accepted
        a.manager
            .do_topology_update(CacheTopology::stable(5, 0, ch), false)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_rejected_topology_leaves_membership_untouched() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let node = TestNode::create(&group, &coordinator, "a", dist_config()).await;
        let first = node.manager.first_topology_as_member();

        // Segment count differs from the configured key partitioner
        let ch = ConsistentHashFactory::Sync.create(
            HashFunction::default(),
            1,
            32,
            &[node.address.clone()],
            None,
        );
        let err = node
            .manager
            .do_topology_update(CacheTopology::stable(1, 0, ch), false)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Config(_)));
        assert!(node.manager.cache_topology().is_none());
        assert_eq!(node.manager.first_topology_as_member(), first);
    }

    #[tokio::test]
    async fn test_rebalancing_disabled_does_not_block_startup() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        coordinator.set_rebalancing_enabled(false);

        let a = joined(&group, &coordinator, "a").await;
        let b = TestNode::start(&group, &coordinator, "b", dist_config()).await;
        assert!(wait_for(|| b.topology_id() == Some(1), WAIT).await);

        // Not a read owner, but nothing will ever make it one
        let topology = b.manager.cache_topology().unwrap();
        assert_eq!(topology.read_consistent_hash().members(), &[a.address.clone()]);
        tokio::time::timeout(WAIT, b.manager.wait_for_initial_state_transfer_to_complete())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(b.manager.rebalancing_status().await.unwrap(), RebalancingStatus::Suspended);
    }

    #[tokio::test]
    async fn test_initial_transfer_timeout() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let config = dist_config()
            .with_state_transfer(StateTransferConfig::default().with_timeout(Duration::from_millis(100)));
        let node = TestNode::create(&group, &coordinator, "a", config).await;

        let err = node
            .manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateTransfer(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_await_initial_transfer_disabled() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let config = dist_config().with_state_transfer(
            StateTransferConfig::default()
                .with_timeout(Duration::from_millis(100))
                .with_await_initial_transfer(false),
        );
        let node = TestNode::create(&group, &coordinator, "a", config).await;

        node.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();
        assert!(!node.manager.is_initial_transfer_complete());
    }

    #[tokio::test]
    async fn test_stop_releases_waiters() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let node = TestNode::create(&group, &coordinator, "a", dist_config()).await;

        let manager = node.manager.clone();
        let waiter = tokio::spawn(async move { manager.wait_for_initial_state_transfer_to_complete().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        node.manager.stop().await.unwrap();

        let result = tokio::time::timeout(WAIT, waiter).await.unwrap().unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_consumer_and_provider_run_concurrently() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let node = TestNode::create(&group, &coordinator, "a", dist_config()).await;

        // Each side only proceeds once the other has started
        let barrier = Arc::new(Barrier::new(2));
        node.consumer.wait_on(barrier.clone());
        node.provider.wait_on(barrier);

        node.manager.start().await.unwrap();
        tokio::time::timeout(WAIT, node.manager.wait_for_initial_state_transfer_to_complete())
            .await
            .expect("consumer and provider were run one after the other")
            .unwrap();
    }

    #[tokio::test]
    async fn test_migration_failure_is_reported_with_confirmation() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let _a = joined(&group, &coordinator, "a").await;

        let b = TestNode::create(&group, &coordinator, "b", dist_config()).await;
        b.consumer.fail_with("segment 3 unavailable");
        b.provider.fail_with("provider offline");
        b.manager.start().await.unwrap();
        b.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();

        let errors: Vec<String> = coordinator
            .confirmations()
            .into_iter()
            .filter(|c| c.node == b.address)
            .filter_map(|c| c.error)
            .collect();
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("segment 3 unavailable"));
        assert!(errors[0].contains("provider offline"));

        // Failures are reported, never raised to the coordinator
        assert!(coordinator.dispatch_errors().is_empty());
    }

    #[tokio::test]
    async fn test_persistent_state_checksum() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();

        let mut scoped = ScopedPersistentState::new(CACHE_NAME);
        scoped.set_property("consistentHash.numSegments", "16");
        scoped.set_property("@timestamp", "1700000000");
        let global_state = InMemoryGlobalState::new();
        global_state.write_scoped_state(scoped.clone());

        let state: Arc<dyn GlobalStateManager> = global_state;
        let a = TestNode::create_with(
            &group,
            &coordinator,
            "a",
            dist_config(),
            GlobalConfig::new("test-cluster"),
            Some(state),
        )
        .await;
        a.manager.start().await.unwrap();
        assert_eq!(a.manager.persistent_state_checksum(), Some(scoped.checksum()));

        let b = TestNode::start(&group, &coordinator, "b", dist_config()).await;
        assert_eq!(b.manager.persistent_state_checksum(), None);
    }

    #[tokio::test]
    async fn test_configured_factory_wins() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let config = dist_config()
            .with_hash(
                HashConfig::default()
                    .with_factory(ConsistentHashFactory::SyncReplicated),
            )
            .with_num_owners(1)
            .with_num_segments(16);

        let a = TestNode::start(&group, &coordinator, "a", config.clone()).await;
        let b = TestNode::start(&group, &coordinator, "b", config).await;
        b.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();

        let topology = a.manager.cache_topology().unwrap();
        for segment in 0..16 {
            assert_eq!(topology.current_ch().locate_owners_for_segment(segment).len(), 2);
        }
    }

    #[tokio::test]
    async fn test_local_cache_cannot_join() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let node = TestNode::create(&group, &coordinator, "a", CacheConfig::new(CacheMode::Local)).await;

        let err = node.manager.start().await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!node.manager.is_join_complete());
    }

    #[tokio::test]
    async fn test_zero_capacity_node_owns_nothing() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let _a = joined(&group, &coordinator, "a").await;

        let b = TestNode::create_with(
            &group,
            &coordinator,
            "b",
            dist_config(),
            GlobalConfig::new("test-cluster").with_zero_capacity(true),
            None,
        )
        .await;
        b.manager.start().await.unwrap();
        b.manager
            .wait_for_initial_state_transfer_to_complete()
            .await
            .unwrap();

        let topology = b.manager.cache_topology().unwrap();
        assert!(topology.current_ch().members().contains(&b.address));
        assert!(topology.current_ch().segments_for_owner(&b.address).is_empty());
        assert_eq!(topology.current_ch().capacity_factor(&b.address), Some(0.0));
    }

    #[tokio::test]
    async fn test_state_transfer_progress_queries() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let a = joined(&group, &coordinator, "a").await;

        assert!(!a.manager.is_state_transfer_in_progress());
        assert!(!a.manager.owns_data());

        a.consumer.mark_key_in_transfer(b"user:1");
        a.consumer.set_owns_data(true);
        assert!(a.manager.is_state_transfer_in_progress());
        assert!(a.manager.is_state_transfer_in_progress_for_key(b"user:1"));
        assert!(!a.manager.is_state_transfer_in_progress_for_key(b"user:2"));
        assert!(a.manager.owns_data());
    }

    #[tokio::test]
    async fn test_forward_to_new_owners() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let a = joined(&group, &coordinator, "a").await;
        let b = joined(&group, &coordinator, "b").await;
        let c = joined(&group, &coordinator, "c").await;
        assert!(wait_for(|| a.topology_id() == Some(8), WAIT).await);

        let topology = a.manager.cache_topology().unwrap();
        let key = find_key(&topology, |owners| owners.contains(&c.address));

        let mut command = ReplicableCommand::new(CACHE_NAME, 2, CacheCommand::put(key.clone(), "v"));
        let before = group.send_count();
        let result = a
            .manager
            .forward_command_if_needed(&mut command, &[key.as_bytes()], &b.address)
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(group.send_count(), before + 1);
        assert_eq!(command.topology_id, 8);
    }

    #[tokio::test]
    async fn test_forward_skips_local_and_origin() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let a = joined(&group, &coordinator, "a").await;
        let b = joined(&group, &coordinator, "b").await;
        let c = joined(&group, &coordinator, "c").await;
        assert!(wait_for(|| a.topology_id() == Some(8), WAIT).await);

        let topology = a.manager.cache_topology().unwrap();
        let key = find_key(&topology, |owners| !owners.contains(&c.address));

        let mut command = ReplicableCommand::new(CACHE_NAME, 2, CacheCommand::remove(key.clone()));
        let before = group.send_count();
        let result = a
            .manager
            .forward_command_if_needed(&mut command, &[key.as_bytes()], &b.address)
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(group.send_count(), before);
        assert_eq!(command.topology_id, 2);
    }

    #[tokio::test]
    async fn test_current_command_is_not_forwarded() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let a = joined(&group, &coordinator, "a").await;
        let b = joined(&group, &coordinator, "b").await;

        let mut command = ReplicableCommand::new(CACHE_NAME, 4, CacheCommand::put("k", "v"));
        let before = group.send_count();
        let result = a
            .manager
            .forward_command_if_needed(&mut command, &[b"k"], &b.address)
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(group.send_count(), before);
    }

    #[tokio::test]
    async fn test_forward_without_topology() {
        init_tracing();
        let group = LocalGroup::new();
        let coordinator = TestTopologyCoordinator::new();
        let node = TestNode::create(&group, &coordinator, "a", dist_config()).await;

        let mut command = ReplicableCommand::new(CACHE_NAME, 0, CacheCommand::put("k", "v"));
        let result = node
            .manager
            .forward_command_if_needed(&mut command, &[b"k"], &Address::named("origin"))
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(group.send_count(), 0);
    }
}
