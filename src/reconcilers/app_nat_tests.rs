// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `app_nat.rs`

#[cfg(test)]
mod tests {
    use crate::crd::{AppExternalNat, AppExternalNatRule, AppExternalNatSpec, Protocol, ResourceState};
    use crate::drivers::fake::{Call, FakeDriver};
    use crate::naming::{KindPrefix, NameGenerator};
    use crate::reconcilers::app_nat::validate_rules;
    use crate::reconcilers::{AppExternalNatHandler, EventHandler};
    use std::sync::Arc;

    const IDENTITY: &str = "10.96.0.1";

    fn rule(host: &str, pool: &str) -> AppExternalNatRule {
        AppExternalNatRule {
            host: host.to_string(),
            pool: pool.to_string(),
        }
    }

    fn app_nat(port: u16, rules: Vec<AppExternalNatRule>) -> AppExternalNat {
        let mut obj = AppExternalNat::new(
            "front",
            AppExternalNatSpec {
                ip: "203.0.113.10".to_string(),
                port,
                protocol: Protocol::Tcp,
                rules,
            },
        );
        obj.metadata.namespace = Some("shop".to_string());
        obj
    }

    fn names() -> NameGenerator {
        NameGenerator::new(IDENTITY)
    }

    fn server() -> String {
        names().external_name(KindPrefix::AppNat, "shop", "front")
    }

    fn pool(name: &str) -> String {
        names().external_name(KindPrefix::Pool, "shop", name)
    }

    fn setup() -> (Arc<FakeDriver>, AppExternalNatHandler) {
        let driver = Arc::new(FakeDriver::new());
        (driver.clone(), AppExternalNatHandler::new(driver, names()))
    }

    #[tokio::test]
    async fn test_add_creates_server_then_binds_rules_in_order() {
        let (driver, handler) = setup();
        let obj = app_nat(80, vec![rule("www.example.com", "web"), rule("api.example.com", "api")]);

        let status = handler.on_add(&obj).await;

        assert_eq!(status.state, ResourceState::Available);
        let vs = server();
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("create_virtual_server", &["UrlRouted", &vs, "203.0.113.10", "80", "tcp"]),
                Call::new("bind_route", &[&vs, "www.example.com", "", &pool("web")]),
                Call::new("bind_route", &[&vs, "api.example.com", "", &pool("api")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_bind_failure_stops_and_reports_error() {
        let (driver, handler) = setup();
        driver.fail_on("bind_route", 2);
        let obj = app_nat(
            80,
            vec![
                rule("a.example.com", "a"),
                rule("b.example.com", "b"),
                rule("c.example.com", "c"),
            ],
        );

        let status = handler.on_add(&obj).await;

        assert_eq!(status.state, ResourceState::Error);
        assert_eq!(
            status.message.as_deref(),
            Some("bind_route failed (HTTP 500): injected failure on bind_route")
        );
        assert_eq!(driver.calls_of("bind_route").len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_hosts_rejected_before_any_call() {
        let (driver, handler) = setup();
        let obj = app_nat(80, vec![rule("www.example.com", "web"), rule("WWW.example.com", "api")]);

        let status = handler.on_add(&obj).await;

        assert_eq!(status.state, ResourceState::Error);
        assert!(status.message.unwrap().contains("www.example.com"));
        assert!(driver.calls().is_empty());
    }

    #[test]
    fn test_identical_rules_are_not_duplicates() {
        assert!(validate_rules(&[rule("a.example.com", "a"), rule("a.example.com", "a")]).is_ok());
    }

    #[tokio::test]
    async fn test_update_removes_before_adding() {
        let (driver, handler) = setup();
        let old = app_nat(80, vec![rule("www.example.com", "web"), rule("api.example.com", "api")]);
        let new = app_nat(80, vec![rule("www.example.com", "web-v2"), rule("api.example.com", "api")]);
        driver.seed_server(&server());

        let status = handler.on_update(&old, &new).await;

        assert_eq!(status.map(|s| s.state), Some(ResourceState::Available));
        let vs = server();
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("unbind_route", &[&vs, "www.example.com", "", &pool("web")]),
                Call::new("bind_route", &[&vs, "www.example.com", "", &pool("web-v2")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_listener_change_is_rejected() {
        let (driver, handler) = setup();
        let old = app_nat(80, vec![]);
        let new = app_nat(8080, vec![]);

        let status = handler.on_update(&old, &new).await.unwrap();

        assert_eq!(status.state, ResourceState::Error);
        assert!(status.message.unwrap().contains("cannot be changed in place"));
        assert!(driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_unbinds_rules_then_deletes_server() {
        let (driver, handler) = setup();
        let obj = app_nat(80, vec![rule("www.example.com", "web"), rule("api.example.com", "api")]);

        handler.on_delete(&obj).await.unwrap();

        let vs = server();
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("unbind_route", &[&vs, "www.example.com", "", &pool("web")]),
                Call::new("unbind_route", &[&vs, "api.example.com", "", &pool("api")]),
                Call::new("delete_virtual_server", &[&vs]),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_continues_after_unbind_failure() {
        let (driver, handler) = setup();
        driver.fail_on("unbind_route", 1);
        let obj = app_nat(80, vec![rule("www.example.com", "web"), rule("api.example.com", "api")]);

        let result = handler.on_delete(&obj).await;

        assert!(result.is_err());
        assert_eq!(driver.calls_of("unbind_route").len(), 2);
        assert_eq!(driver.calls_of("delete_virtual_server").len(), 1);
    }

    #[tokio::test]
    async fn test_recovery_binds_new_rules_before_unbinding_stale_ones() {
        let (driver, handler) = setup();
        driver.fail_on("create_virtual_server", 1);
        let old = app_nat(80, vec![rule("www.example.com", "web"), rule("api.example.com", "api")]);
        assert!(handler.on_add(&old).await.is_error());
        driver.clear_calls();
        let new = app_nat(80, vec![rule("www.example.com", "web-v2"), rule("api.example.com", "api")]);

        let status = handler.on_recover(&old, &new).await;

        assert_eq!(status.state, ResourceState::Available);
        let vs = server();
        assert_eq!(
            driver.calls(),
            vec![
                Call::new("create_virtual_server", &["UrlRouted", &vs, "203.0.113.10", "80", "tcp"]),
                Call::new("bind_route", &[&vs, "www.example.com", "", &pool("web-v2")]),
                Call::new("bind_route", &[&vs, "api.example.com", "", &pool("api")]),
                Call::new("unbind_route", &[&vs, "www.example.com", "", &pool("web")]),
            ]
        );
    }

    #[tokio::test]
    async fn test_recovery_rejects_listener_change() {
        let (driver, handler) = setup();
        let old = app_nat(80, vec![rule("www.example.com", "web")]);
        let new = app_nat(8080, vec![rule("www.example.com", "web")]);

        let status = handler.on_recover(&old, &new).await;

        assert!(status.is_error());
        assert!(status.message.unwrap().contains("203.0.113.10:80/tcp"));
        assert!(driver.calls().is_empty());
    }
}
