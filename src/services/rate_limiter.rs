//! Sliding-window rate limiting
//!
//! - login: 5 failed attempts per email per 15 minutes, 10 requests per IP
//!   per minute
//! - contact form: 5 messages per IP per hour

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::hash::Hash;
use std::net::IpAddr;
use tokio::sync::RwLock;

/// Counts events per key inside a trailing window
pub struct SlidingWindow<K> {
    window: Duration,
    limit: usize,
    hits: RwLock<HashMap<K, Vec<DateTime<Utc>>>>,
}

impl<K: Eq + Hash + Clone> SlidingWindow<K> {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            hits: RwLock::new(HashMap::new()),
        }
    }

    /// True once `limit` events fall inside the window
    pub async fn is_limited(&self, key: &K) -> bool {
        let cutoff = Utc::now() - self.window;
        let mut hits = self.hits.write().await;
        match hits.get_mut(key) {
            Some(times) => {
                times.retain(|time| *time > cutoff);
                times.len() >= self.limit
            }
            None => false,
        }
    }

    pub async fn record(&self, key: K) {
        let mut hits = self.hits.write().await;
        hits.entry(key).or_default().push(Utc::now());
    }

    pub async fn clear(&self, key: &K) {
        self.hits.write().await.remove(key);
    }

    /// Drop events older than the window and keys left empty
    pub async fn cleanup(&self) {
        let cutoff = Utc::now() - self.window;
        let mut hits = self.hits.write().await;
        hits.retain(|_, times| {
            times.retain(|time| *time > cutoff);
            !times.is_empty()
        });
    }

    pub async fn tracked_keys(&self) -> usize {
        self.hits.read().await.len()
    }
}

pub struct LoginRateLimiter {
    emails: SlidingWindow<String>,
    ips: SlidingWindow<IpAddr>,
}

impl LoginRateLimiter {
    pub fn new() -> Self {
        Self {
            emails: SlidingWindow::new(Duration::minutes(15), 5),
            ips: SlidingWindow::new(Duration::minutes(1), 10),
        }
    }

    pub async fn is_email_limited(&self, email: &str) -> bool {
        self.emails.is_limited(&email.trim().to_lowercase()).await
    }

    pub async fn record_failed_attempt(&self, email: &str) {
        self.emails.record(email.trim().to_lowercase()).await;
    }

    /// Forget failures after a successful login
    pub async fn clear_email_attempts(&self, email: &str) {
        self.emails.clear(&email.trim().to_lowercase()).await;
    }

    pub async fn is_ip_limited(&self, ip: IpAddr) -> bool {
        self.ips.is_limited(&ip).await
    }

    pub async fn record_ip_request(&self, ip: IpAddr) {
        self.ips.record(ip).await;
    }

    pub async fn cleanup(&self) {
        self.emails.cleanup().await;
        self.ips.cleanup().await;
    }
}

impl Default for LoginRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Contact form submissions per IP
pub struct ContactRateLimiter {
    ips: SlidingWindow<IpAddr>,
}

impl ContactRateLimiter {
    pub fn new() -> Self {
        Self {
            ips: SlidingWindow::new(Duration::hours(1), 5),
        }
    }

    /// Record the submission unless the IP is already limited. Returns false
    /// when the submission must be refused.
    pub async fn try_acquire(&self, ip: IpAddr) -> bool {
        if self.ips.is_limited(&ip).await {
            return false;
        }
        self.ips.record(ip).await;
        true
    }

    pub async fn cleanup(&self) {
        self.ips.cleanup().await;
    }
}

impl Default for ContactRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
