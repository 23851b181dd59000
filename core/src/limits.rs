use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Per-host concurrency caps, created lazily the first time a host is seen.
#[derive(Clone)]
pub struct HostLimiter {
    per_host: usize,
    sems: Arc<Mutex<HashMap<String, Arc<Semaphore>>>>,
}

impl HostLimiter {
    pub fn new(per_host: usize) -> Self {
        HostLimiter { per_host: per_host.max(1), sems: Arc::new(Mutex::new(HashMap::new())) }
    }

    pub fn per_host(&self) -> usize {
        self.per_host
    }

    fn semaphore(&self, host: &str) -> Arc<Semaphore> {
        let mut map = match self.sems.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.entry(host.to_string()).or_insert_with(|| Arc::new(Semaphore::new(self.per_host))).clone()
    }

    pub async fn acquire(&self, host: &str) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.semaphore(host).acquire_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn caps_each_host_independently() {
        let lim = HostLimiter::new(1);
        let a = lim.acquire("a.example.com").await.unwrap();
        let b = lim.acquire("b.example.com").await;
        assert!(b.is_ok());
        let blocked = tokio::time::timeout(std::time::Duration::from_millis(50), lim.acquire("a.example.com")).await;
        assert!(blocked.is_err());
        drop(a);
        assert!(lim.acquire("a.example.com").await.is_ok());
    }
}
