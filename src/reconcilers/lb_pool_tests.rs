// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `lb_pool.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{AppLoadBalancerPool, AppLoadBalancerPoolSpec, PoolMember, ResourceState};
    use crate::drivers::fake::{Call, FakeDriver};
    use crate::naming::{KindPrefix, NameGenerator};
    use crate::reconcilers::{AppLoadBalancerPoolHandler, EventHandler};
    use std::sync::Arc;

    fn pool(members: &[(&str, Option<u32>)]) -> AppLoadBalancerPool {
        let mut pool = AppLoadBalancerPool::new(
            "api",
            AppLoadBalancerPoolSpec {
                lb_method: None,
                members: members
                    .iter()
                    .map(|(ip, weight)| PoolMember {
                        ip: (*ip).to_string(),
                        port: 8080,
                        weight: *weight,
                    })
                    .collect(),
            },
        );
        pool.metadata.namespace = Some("portal".to_string());
        pool
    }

    fn setup() -> (Arc<FakeDriver>, AppLoadBalancerPoolHandler, String) {
        let driver = Arc::new(FakeDriver::new());
        let names = NameGenerator::new("10.96.0.1");
        let name = names.external_name(KindPrefix::ContentSwitchPool, "portal", "api");
        (
            driver.clone(),
            AppLoadBalancerPoolHandler::new(driver, names),
            name,
        )
    }

    #[tokio::test]
    async fn test_pool_uses_content_switching_name() {
        let (driver, handler, name) = setup();

        let status = handler.on_add(&pool(&[("10.1.0.1", Some(2))])).await;

        assert_eq!(status.state, ResourceState::Available);
        assert!(name.starts_with("CSPOOL_portal__api__"));
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("create_pool", &[&name, "RoundRobin"]),
                Call::new("add_member", &[&name, "10.1.0.1:8080:2"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_members_added_before_removed() {
        let (driver, handler, name) = setup();
        let old = pool(&[("10.1.0.1", None)]);
        let new = pool(&[("10.1.0.2", None)]);
        driver.seed_pool(&name);

        handler.on_update(&old, &new).await;

        assert_eq!(
            driver.calls(),
            vec![
                Call::new("add_member", &[&name, "10.1.0.2:8080:1"]),
                Call::new("remove_member", &[&name, "10.1.0.1:8080:1"]),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_failure_is_returned() {
        let (driver, handler, _) = setup();
        driver.fail_on("delete_pool", 1);

        let err = handler.on_delete(&pool(&[])).await.unwrap_err();

        assert_eq!(err.status_code(), Some(500));
    }
}
