// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `load_balancer.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{
        AppLoadBalancer, AppLoadBalancerPath, AppLoadBalancerRule, AppLoadBalancerSpec,
        ResourceState, ResourceStatus,
    };
    use crate::drivers::fake::{Call, FakeDriver};
    use crate::naming::{KindPrefix, NameGenerator};
    use crate::reconcilers::{AppLoadBalancerHandler, EventHandler};
    use std::sync::Arc;

    const SUBNET: &str = "198.51.100.0/24";

    fn path(path: Option<&str>, pool: &str) -> AppLoadBalancerPath {
        AppLoadBalancerPath {
            path: path.map(ToString::to_string),
            pool: pool.to_string(),
        }
    }

    fn lb(name: &str, ip: Option<&str>, paths: Vec<AppLoadBalancerPath>) -> AppLoadBalancer {
        let mut obj = AppLoadBalancer::new(
            name,
            AppLoadBalancerSpec {
                ip: ip.map(ToString::to_string),
                port: 80,
                subnet: SUBNET.to_string(),
                rules: vec![AppLoadBalancerRule {
                    host: "portal.example.com".to_string(),
                    paths,
                }],
            },
        );
        obj.metadata.namespace = Some("portal".to_string());
        obj
    }

    fn names() -> NameGenerator {
        NameGenerator::new("10.96.0.1")
    }

    fn lb_name(name: &str) -> String {
        names().external_name(KindPrefix::ContentSwitchLb, "portal", name)
    }

    fn pool(name: &str) -> String {
        names().external_name(KindPrefix::ContentSwitchPool, "portal", name)
    }

    fn setup() -> (Arc<FakeDriver>, AppLoadBalancerHandler) {
        let driver = Arc::new(FakeDriver::new());
        (driver.clone(), AppLoadBalancerHandler::new(driver, names()))
    }

    #[tokio::test]
    async fn test_add_allocates_vip_and_adds_rules() {
        let (driver, handler) = setup();
        let obj = lb("main", None, vec![path(Some("/api"), "api"), path(None, "web")]);

        let status = handler.on_add(&obj).await;

        assert_eq!(status.state, ResourceState::Available);
        assert_eq!(status.vip.as_deref(), Some("198.51.100.1"));
        let cs = lb_name("main");
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("create_lb", &[&cs, "198.51.100.1", "80"]),
                Call::new("add_rule", &[&cs, "portal.example.com", "/api", &pool("api")]),
                Call::new("add_rule", &[&cs, "portal.example.com", "", &pool("web")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_separate_resources_get_distinct_vips() {
        let (_, handler) = setup();

        let first = handler.on_add(&lb("one", None, vec![])).await;
        let second = handler.on_add(&lb("two", None, vec![])).await;

        assert_eq!(first.vip.as_deref(), Some("198.51.100.1"));
        assert_eq!(second.vip.as_deref(), Some("198.51.100.2"));
    }

    #[tokio::test]
    async fn test_repeated_add_keeps_vip() {
        let (_, handler) = setup();
        let obj = lb("main", None, vec![]);

        let first = handler.on_add(&obj).await;
        let again = handler.on_add(&obj).await;

        assert_eq!(first.vip, again.vip);
    }

    #[tokio::test]
    async fn test_declared_ip_is_reserved() {
        let (driver, handler) = setup();
        let obj = lb("fixed", Some("198.51.100.1"), vec![]);

        let status = handler.on_add(&obj).await;
        let other = handler.on_add(&lb("auto", None, vec![])).await;

        assert_eq!(status.vip.as_deref(), Some("198.51.100.1"));
        assert_eq!(other.vip.as_deref(), Some("198.51.100.2"));
        assert_eq!(driver.calls_of("create_lb").len(), 2);
    }

    #[tokio::test]
    async fn test_declared_ip_outside_subnet_is_error() {
        let (driver, handler) = setup();

        let status = handler.on_add(&lb("fixed", Some("192.0.2.7"), vec![])).await;

        assert_eq!(status.state, ResourceState::Error);
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_recorded_vip_is_reused_after_restart() {
        let (driver, handler) = setup();
        let mut obj = lb("main", None, vec![]);
        obj.status = Some(ResourceStatus::available().with_vip("198.51.100.77"));

        let status = handler.on_add(&obj).await;

        assert_eq!(status.vip.as_deref(), Some("198.51.100.77"));
        assert!(handler.is_reserved(SUBNET, "198.51.100.77"));
        assert_eq!(
            driver.calls_of("create_lb"),
            vec![Call::new("create_lb", &[&lb_name("main"), "198.51.100.77", "80"])]
        );
    }

    #[tokio::test]
    async fn test_duplicate_host_path_rejected() {
        let (driver, handler) = setup();
        let obj = lb("main", None, vec![path(Some("/api"), "a"), path(Some("/api"), "b")]);

        let status = handler.on_add(&obj).await;

        assert!(status.is_error());
        assert!(status.message.unwrap().contains("/api"));
        assert!(driver.calls().is_empty());
        assert!(handler.assigned_vip("portal", "main").is_none());
    }

    #[tokio::test]
    async fn test_update_adds_before_removing() {
        let (driver, handler) = setup();
        let old = lb("main", None, vec![path(Some("/v1"), "api")]);
        let new = lb("main", None, vec![path(Some("/v2"), "api")]);
        handler.on_add(&old).await;
        driver.clear_calls();

        let status = handler.on_update(&old, &new).await.unwrap();

        assert_eq!(status.state, ResourceState::Available);
        assert_eq!(status.vip.as_deref(), Some("198.51.100.1"));
        let cs = lb_name("main");
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("add_rule", &[&cs, "portal.example.com", "/v2", &pool("api")]),
                Call::new("remove_rule", &[&cs, "portal.example.com", "/v1", &pool("api")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_port_change_is_rejected() {
        let (driver, handler) = setup();
        let old = lb("main", None, vec![]);
        handler.on_add(&old).await;
        driver.clear_calls();
        let mut new = old.clone();
        new.spec.port = 443;

        let status = handler.on_update(&old, &new).await.unwrap();

        assert!(status.is_error());
        assert_eq!(status.vip.as_deref(), Some("198.51.100.1"));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_rules_and_releases_vip() {
        let (driver, handler) = setup();
        let obj = lb("main", None, vec![path(None, "web")]);
        handler.on_add(&obj).await;
        driver.clear_calls();

        handler.on_delete(&obj).await.unwrap();

        let cs = lb_name("main");
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("remove_rule", &[&cs, "portal.example.com", "", &pool("web")]),
                Call::new("delete_lb", &[&cs]),
            ]
        );
        assert!(!handler.is_reserved(SUBNET, "198.51.100.1"));
        assert!(handler.assigned_vip("portal", "main").is_none());

        // The released address is handed out again
        let next = handler.on_add(&lb("other", None, vec![])).await;
        assert_eq!(next.vip.as_deref(), Some("198.51.100.1"));
    }

    #[tokio::test]
    async fn test_declared_ip_held_by_another_resource_is_error() {
        let (driver, handler) = setup();
        let auto = handler.on_add(&lb("auto", None, vec![])).await;
        assert_eq!(auto.vip.as_deref(), Some("198.51.100.1"));
        driver.clear_calls();
        let fixed = lb("fixed", Some("198.51.100.1"), vec![]);

        let status = handler.on_add(&fixed).await;

        assert!(status.is_error());
        assert!(status.vip.is_none());
        assert!(status
            .message
            .unwrap()
            .contains("already assigned to portal/auto"));
        assert!(driver.calls_of("create_lb").is_empty());

        // Cleaning up the rejected resource leaves the holder's address alone
        handler.on_delete(&fixed).await.unwrap();
        assert!(handler.is_reserved(SUBNET, "198.51.100.1"));
        assert_eq!(
            handler.assigned_vip("portal", "auto").as_deref(),
            Some("198.51.100.1")
        );
        let third = handler.on_add(&lb("third", None, vec![])).await;
        assert_eq!(third.vip.as_deref(), Some("198.51.100.2"));
    }

    #[tokio::test]
    async fn test_recorded_vip_taken_before_relist_is_error() {
        let (driver, handler) = setup();
        // After a restart a new resource is listed first and takes the lowest address
        let newcomer = handler.on_add(&lb("newcomer", None, vec![])).await;
        assert_eq!(newcomer.vip.as_deref(), Some("198.51.100.1"));
        driver.clear_calls();
        let mut existing = lb("existing", None, vec![]);
        existing.status = Some(ResourceStatus::available().with_vip("198.51.100.1"));

        let status = handler.on_add(&existing).await;

        assert!(status.is_error());
        assert!(status.message.unwrap().contains("portal/newcomer"));
        assert!(driver.calls().is_empty());
        assert!(handler.assigned_vip("portal", "existing").is_none());
    }

    #[tokio::test]
    async fn test_recovery_accepts_corrected_ip() {
        let (driver, handler) = setup();
        handler.on_add(&lb("auto", None, vec![])).await;
        let mut old = lb("fixed", Some("198.51.100.1"), vec![path(None, "web")]);
        old.status = Some(handler.on_add(&old).await);
        assert!(old.status.as_ref().is_some_and(ResourceStatus::is_error));
        driver.clear_calls();
        let mut new = lb("fixed", Some("198.51.100.9"), vec![path(None, "web")]);
        new.status = old.status.clone();

        let status = handler.on_recover(&old, &new).await;

        assert_eq!(status.state, ResourceState::Available);
        assert_eq!(status.vip.as_deref(), Some("198.51.100.9"));
        assert_eq!(
            driver.calls_of("create_lb"),
            vec![Call::new("create_lb", &[&lb_name("fixed"), "198.51.100.9", "80"])]
        );
        assert!(driver.calls_of("remove_rule").is_empty());
    }

    #[tokio::test]
    async fn test_recovery_keeps_listener_once_vip_is_held() {
        let (driver, handler) = setup();
        driver.fail_on("create_lb", 1);
        let mut old = lb("main", None, vec![]);
        let failed = handler.on_add(&old).await;
        assert!(failed.is_error());
        assert_eq!(failed.vip.as_deref(), Some("198.51.100.1"));
        old.status = Some(failed);
        driver.clear_calls();
        let mut new = old.clone();
        new.spec.port = 443;

        let status = handler.on_recover(&old, &new).await;

        assert!(status.is_error());
        assert!(status.message.unwrap().contains("cannot be changed in place"));
        assert_eq!(status.vip.as_deref(), Some("198.51.100.1"));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_rule_on_missing_lb_is_error() {
        let (driver, handler) = setup();
        let old = lb("main", None, vec![]);
        let new = lb("main", None, vec![path(None, "web")]);

        let status = handler.on_update(&old, &new).await.unwrap();

        assert!(status.is_error());
        assert!(status.message.unwrap().contains("not found"));
        assert_eq!(driver.calls_of("add_rule").len(), 1);
    }
}
