// Rotation over a provider's API keys with temporary disablement
use reqwest::{Response, StatusCode};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::warn;

use super::ProviderError;

/// Round-robin key pool. Disabled keys carry an expiry and are re-enabled
/// lazily the next time the pool is read.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<String>,
    cursor: AtomicUsize,
    disabled: Mutex<HashMap<String, Instant>>,
    cooldown: Duration,
}

impl KeyPool {
    pub fn new(keys: Vec<String>, cooldown: Duration) -> Self {
        Self {
            keys,
            cursor: AtomicUsize::new(0),
            disabled: Mutex::new(HashMap::new()),
            cooldown,
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next enabled key in rotation order, or `None` when every key is cooling down.
    pub fn next_key(&self) -> Option<String> {
        if self.keys.is_empty() {
            return None;
        }

        let mut disabled = self.lock_disabled();
        let now = Instant::now();
        disabled.retain(|_, until| *until > now);

        for _ in 0..self.keys.len() {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % self.keys.len();
            let key = &self.keys[idx];
            if !disabled.contains_key(key) {
                return Some(key.clone());
            }
        }
        None
    }

    pub fn disable(&self, key: &str) {
        self.disable_for(key, self.cooldown);
    }

    pub fn disable_for(&self, key: &str, cooldown: Duration) {
        self.lock_disabled()
            .insert(key.to_string(), Instant::now() + cooldown);
    }

    pub fn available(&self) -> usize {
        let mut disabled = self.lock_disabled();
        let now = Instant::now();
        disabled.retain(|_, until| *until > now);
        self.keys.len() - disabled.len()
    }

    /// Sends with successive keys, disabling each one the provider refuses
    /// (401, 403, 429). Gives up once every key has been tried.
    pub async fn send_with_rotation<F, Fut>(
        &self,
        provider: &str,
        mut send: F,
    ) -> Result<Response, ProviderError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = reqwest::Result<Response>>,
    {
        for _ in 0..self.keys.len() {
            let Some(key) = self.next_key() else {
                break;
            };

            let response = send(key.clone()).await?;
            let status = response.status();

            if is_key_failure(status) {
                warn!(
                    "[{provider}] key ...{} refused with {status}, disabling for {:?}",
                    key_suffix(&key),
                    self.cooldown
                );
                self.disable(&key);
                continue;
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ProviderError::Status {
                    status: status.as_u16(),
                    body,
                });
            }

            return Ok(response);
        }

        Err(ProviderError::NoAvailableKey(provider.to_string()))
    }

    fn lock_disabled(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        self.disabled.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_key_failure(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
    )
}

fn key_suffix(key: &str) -> &str {
    let start = key.len().saturating_sub(4);
    key.get(start..).unwrap_or("")
}
