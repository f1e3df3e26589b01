use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use uuid::Uuid;

use crate::browser::pool::{SessionOutcome, SessionPool};
use crate::browser::session::{BrowsingSession, SessionFactory};
use crate::error::Result;
use crate::proxy::{ProxyCredential, ProxyPool};

struct StubSession {
    id: Uuid,
    proxy: Option<ProxyCredential>,
}

#[async_trait]
impl BrowsingSession for StubSession {
    fn id(&self) -> Uuid {
        self.id
    }

    fn proxy(&self) -> Option<&ProxyCredential> {
        self.proxy.as_ref()
    }

    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn evaluate(&self, _script: &str) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn content(&self) -> Result<String> {
        Ok(String::new())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct StubFactory {
    created: AtomicUsize,
}

impl StubFactory {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            created: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SessionFactory for StubFactory {
    async fn create(&self, proxy: Option<ProxyCredential>) -> Result<Box<dyn BrowsingSession>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            id: Uuid::new_v4(),
            proxy,
        }))
    }
}

fn cred(host: &str) -> ProxyCredential {
    ProxyCredential {
        host: host.to_string(),
        port: 8080,
        username: "user".to_string(),
        password: "pass".to_string(),
    }
}

#[tokio::test]
async fn test_acquire_beyond_capacity_suspends_until_release() {
    let proxies = Arc::new(ProxyPool::from_credentials(vec![cred("a"), cred("b")]));
    let pool = SessionPool::new(StubFactory::new(), Some(proxies), 2);

    let lease_a = pool.acquire().await.unwrap();
    let _lease_b = pool.acquire().await.unwrap();

    // pool exhausted: a third acquire must suspend
    let blocked = timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(blocked.is_err(), "acquire should suspend at capacity");

    drop(lease_a);

    let lease_c = timeout(Duration::from_millis(200), pool.acquire())
        .await
        .expect("acquire should resume after a release")
        .unwrap();
    assert!(!lease_c.is_broken());
}

#[tokio::test]
async fn test_broken_session_replaced_with_next_proxy() {
    let proxies = Arc::new(ProxyPool::from_credentials(vec![cred("a"), cred("b")]));
    let pool = SessionPool::new(StubFactory::new(), Some(proxies), 1);

    let lease = pool.acquire().await.unwrap();
    let first_proxy = lease.session().proxy().unwrap().host.clone();
    SessionPool::release(lease, SessionOutcome::Broken);

    let lease = pool.acquire().await.unwrap();
    let second_proxy = lease.session().proxy().unwrap().host.clone();

    assert_ne!(
        first_proxy, second_proxy,
        "replacement session should be bound to a different proxy"
    );
}

#[tokio::test]
async fn test_healthy_session_is_reused() {
    let proxies = Arc::new(ProxyPool::from_credentials(vec![cred("a"), cred("b")]));
    let factory = StubFactory::new();
    let pool = SessionPool::new(factory.clone(), Some(proxies), 1);

    let lease = pool.acquire().await.unwrap();
    let first_id = lease.session().id();
    drop(lease);

    let lease = pool.acquire().await.unwrap();
    assert_eq!(lease.session().id(), first_id);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_empty_proxy_pool_fails_pool_init() {
    let proxies = Arc::new(ProxyPool::from_credentials(Vec::new()));
    let pool = SessionPool::new(StubFactory::new(), Some(proxies), 4);

    let err = pool.acquire().await.unwrap_err();
    assert!(err.to_string().contains("pool init"), "got: {}", err);
}

#[tokio::test]
async fn test_capacity_capped_by_proxy_count() {
    let proxies = Arc::new(ProxyPool::from_credentials(vec![cred("a")]));
    let pool = SessionPool::new(StubFactory::new(), Some(proxies), 8);

    let _lease = pool.acquire().await.unwrap();

    // only one proxy, so only one slot despite max_capacity of 8
    let blocked = timeout(Duration::from_millis(50), pool.acquire()).await;
    assert!(blocked.is_err());
}

#[tokio::test]
async fn test_proxyless_pool_hands_out_unbound_sessions() {
    let pool = SessionPool::new(StubFactory::new(), None, 2);

    let lease = pool.acquire().await.unwrap();
    assert!(lease.session().proxy().is_none());
}

#[tokio::test]
async fn test_idle_count_tracks_releases() {
    let pool = SessionPool::new(StubFactory::new(), None, 2);

    let lease = pool.acquire().await.unwrap();
    assert_eq!(pool.idle_count(), 0);
    drop(lease);
    assert_eq!(pool.idle_count(), 1);

    pool.shutdown().await;
    assert_eq!(pool.idle_count(), 0);
}
