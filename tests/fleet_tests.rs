//! Integration tests for fleet execution.
//!
//! These tests drive the live and replay executors over a mock transport:
//! - Gateway tunnel sharing and failure attribution
//! - Partial failure and per-host timeouts
//! - Cache supersession, scoping and persistence

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod helpers;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use helpers::mock_transport::MockTransport;
use smartos_manager::config::{GlobalDefaults, Host, HostDirectory};
use smartos_manager::fleet::{FleetExecutor, HostOutputs, LiveExecutor, ReplayExecutor, ResultCache};

const SCOPE: &str = "production";
const BUILD: &str = "uname -v";

fn directory(hosts: Vec<Host>) -> HostDirectory {
    HostDirectory::new(hosts, GlobalDefaults::default(), BTreeMap::new()).unwrap()
}

fn direct_hosts(n: usize) -> Vec<Host> {
    (1..=n)
        .map(|i| Host::new(format!("node{i}"), format!("10.0.0.{i}")))
        .collect()
}

fn gated_hosts(n: usize, gateway: &str, gateway_user: &str) -> Vec<Host> {
    (1..=n)
        .map(|i| {
            Host::new(format!("gated{i}"), format!("10.1.0.{i}"))
                .with_gateway(gateway, Some(gateway_user.to_string()))
        })
        .collect()
}

fn live(hosts: Vec<Host>, transport: &Arc<MockTransport>, cache: ResultCache) -> LiveExecutor {
    LiveExecutor::new(&directory(hosts), transport.clone(), cache, SCOPE)
}

fn outputs(pairs: &[(&str, &str)]) -> HostOutputs {
    pairs
        .iter()
        .map(|(h, o)| ((*h).to_string(), (*o).to_string()))
        .collect()
}

// ============================================================================
// Gateway Tunnels
// ============================================================================

mod tunnel_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_hosts_behind_one_gateway_share_one_tunnel() {
        let transport = Arc::new(MockTransport::new().with_open_delay(Duration::from_millis(50)));
        let hosts = gated_hosts(8, "bastion", "jump");
        let executor = live(hosts.clone(), &transport, ResultCache::in_memory());

        let result = executor.execute(BUILD).await;

        assert_eq!(result.succeeded(), 8);
        assert_eq!(transport.opens(), 1);
        assert_eq!(executor.tunnels().established(), 1);

        let first = transport.tunnel_id(&hosts[0].address).unwrap();
        for host in &hosts {
            assert_eq!(transport.tunnel_id(&host.address), Some(first));
        }
    }

    #[tokio::test]
    async fn test_tunnel_is_reused_across_rounds() {
        let transport = Arc::new(MockTransport::new());
        let executor = live(gated_hosts(3, "bastion", "jump"), &transport, ResultCache::in_memory());

        executor.execute(BUILD).await;
        executor.execute("prtconf -m").await;

        assert_eq!(transport.opens(), 1);
    }

    #[tokio::test]
    async fn test_gateway_user_is_part_of_tunnel_identity() {
        let transport = Arc::new(MockTransport::new());
        let mut hosts = gated_hosts(2, "bastion", "alice");
        hosts.push(Host::new("other", "10.2.0.1").with_gateway("bastion", Some("bob".to_string())));
        let executor = live(hosts, &transport, ResultCache::in_memory());

        executor.execute(BUILD).await;

        assert_eq!(transport.opens(), 2);
        assert_ne!(transport.tunnel_id("10.1.0.1"), transport.tunnel_id("10.2.0.1"));
        assert_eq!(transport.tunnel_id("10.1.0.1"), transport.tunnel_id("10.1.0.2"));
    }

    #[tokio::test]
    async fn test_tunnel_failure_fails_every_dependent_host() {
        let transport = Arc::new(MockTransport::new().with_open_delay(Duration::from_millis(20)));
        transport.fail_gateway("bastion");
        transport.respond("10.0.0.1", BUILD, "joyent_20150108T111855Z");

        let mut hosts = gated_hosts(3, "bastion", "jump");
        hosts.extend(direct_hosts(1));
        let executor = live(hosts, &transport, ResultCache::in_memory());

        let result = executor.execute(BUILD).await;

        assert_eq!(result.outputs, outputs(&[("10.0.0.1", "joyent_20150108T111855Z")]));
        assert_eq!(
            result.failed.iter().cloned().collect::<Vec<_>>(),
            vec!["10.1.0.1", "10.1.0.2", "10.1.0.3"]
        );

        // the failure is remembered, not retried
        executor.execute(BUILD).await;
        assert_eq!(transport.opens(), 1);
        assert_eq!(executor.failed_hosts().len(), 3);
    }

    #[tokio::test]
    async fn test_shutdown_closes_tunnels() {
        let transport = Arc::new(MockTransport::new());
        let mut hosts = gated_hosts(2, "bastion", "jump");
        hosts.push(Host::new("far", "10.3.0.1").with_gateway("bastion2", None));
        let executor = live(hosts, &transport, ResultCache::in_memory());

        executor.execute(BUILD).await;
        executor.shutdown().await;

        assert_eq!(transport.closes(), 2);
        assert_eq!(executor.tunnels().established(), 0);
    }
}

// ============================================================================
// Fan-out
// ============================================================================

mod fan_out_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_one_failing_host_of_n() {
        let transport = Arc::new(MockTransport::new());
        let hosts = direct_hosts(5);
        for host in &hosts {
            transport.respond(&host.address, BUILD, "joyent_20150108T111855Z");
        }
        transport.fail_host("10.0.0.3");
        let executor = live(hosts, &transport, ResultCache::in_memory());

        let result = executor.execute(BUILD).await;

        assert_eq!(result.succeeded(), 4);
        assert!(result.is_failed("10.0.0.3"));
        assert!(result.output("10.0.0.3").is_none());
        assert_eq!(executor.failed_hosts(), vec!["10.0.0.3"]);
    }

    #[tokio::test]
    async fn test_failed_hosts_accumulate_and_dedupe() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_host("10.0.0.2");
        transport.fail_command("10.0.0.1", "prtconf -m");
        let executor = live(direct_hosts(3), &transport, ResultCache::in_memory());

        executor.execute(BUILD).await;
        executor.execute("prtconf -m").await;
        executor.execute(BUILD).await;

        assert_eq!(executor.failed_hosts(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[tokio::test]
    async fn test_hung_host_is_failed_after_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.hang_host("10.0.0.2");
        transport.respond("10.0.0.1", BUILD, "a");
        transport.respond("10.0.0.3", BUILD, "c");
        let executor = live(direct_hosts(3), &transport, ResultCache::in_memory())
            .with_host_timeout(Duration::from_millis(200));

        let result = tokio::time::timeout(Duration::from_secs(10), executor.execute(BUILD))
            .await
            .expect("round must complete despite a hung host");

        assert_eq!(result.outputs, outputs(&[("10.0.0.1", "a"), ("10.0.0.3", "c")]));
        assert!(result.is_failed("10.0.0.2"));
    }

    #[tokio::test]
    async fn test_empty_command_touches_no_host() {
        let transport = Arc::new(MockTransport::new());
        let executor = live(direct_hosts(2), &transport, ResultCache::in_memory());

        let result = executor.execute("   ").await;

        assert!(result.outputs.is_empty());
        assert_eq!(result.failed.len(), 2);
        assert_eq!(transport.run_count(), 0);
        assert_eq!(transport.opens(), 0);
    }

    #[tokio::test]
    async fn test_empty_output_is_a_success() {
        let transport = Arc::new(MockTransport::new());
        let executor = live(direct_hosts(1), &transport, ResultCache::in_memory());

        let result = executor.execute("vmadm list -p -H -o uuid").await;

        assert_eq!(result.output("10.0.0.1"), Some(""));
        assert!(result.failed.is_empty());
    }
}

// ============================================================================
// Cache
// ============================================================================

mod cache_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_second_run_supersedes_first() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("10.0.0.1", BUILD, "joyent_2014");
        transport.respond("10.0.0.2", BUILD, "joyent_2014");
        let executor = live(direct_hosts(2), &transport, ResultCache::in_memory());
        executor.execute(BUILD).await;

        transport.respond("10.0.0.1", BUILD, "joyent_2015");
        transport.fail_host("10.0.0.2");
        executor.execute(BUILD).await;

        let replay = ReplayExecutor::new(executor.cache_snapshot(), SCOPE);
        let replayed = replay.execute(BUILD).await;

        assert_eq!(replayed.outputs, outputs(&[("10.0.0.1", "joyent_2015")]));
    }

    #[tokio::test]
    async fn test_results_are_persisted_after_each_round() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let transport = Arc::new(MockTransport::new());
        transport.respond("10.0.0.1", "prtconf -m", "65503");

        let executor = live(direct_hosts(1), &transport, ResultCache::load(&path));
        executor.execute("prtconf -m").await;

        let reloaded = ResultCache::load(&path);
        assert_eq!(
            reloaded.get(SCOPE, "prtconf -m"),
            Some(&outputs(&[("10.0.0.1", "65503")]))
        );
    }

    #[tokio::test]
    async fn test_unwritable_cache_does_not_fail_round() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let transport = Arc::new(MockTransport::new());
        transport.respond("10.0.0.1", BUILD, "joyent");

        // parent is a regular file, so the save fails
        let executor = live(direct_hosts(1), &transport, ResultCache::load(blocker.join("cache.json")));
        let result = executor.execute(BUILD).await;

        assert_eq!(result.output("10.0.0.1"), Some("joyent"));
    }

    #[tokio::test]
    async fn test_scopes_do_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let transport = Arc::new(MockTransport::new());
        transport.respond("10.0.0.1", BUILD, "staging-build");

        let staging = LiveExecutor::new(
            &directory(direct_hosts(1)),
            transport.clone(),
            ResultCache::load(&path),
            "staging",
        );
        staging.execute(BUILD).await;

        let production = ReplayExecutor::new(ResultCache::load(&path), "production");
        assert!(production.execute(BUILD).await.outputs.is_empty());

        let staging_replay = ReplayExecutor::new(ResultCache::load(&path), "staging");
        assert_eq!(
            staging_replay.execute(BUILD).await.output("10.0.0.1"),
            Some("staging-build")
        );
    }

    #[tokio::test]
    async fn test_replay_miss_is_empty() {
        let replay = ReplayExecutor::new(ResultCache::in_memory(), SCOPE);
        let result = replay.execute(BUILD).await;

        assert!(result.outputs.is_empty());
        assert!(result.failed.is_empty());
        assert!(replay.failed_hosts().is_empty());
    }
}
