//! Per-user concurrency gate for LLM generations.
//!
//! A counting semaphore per user caps parallel generations; excess requests
//! queue FIFO with a timeout. The semaphore alone can't report queue depth,
//! so a separate counter tracks waiters for the "position N in queue"
//! user feedback. Per-user state is retained across requests to keep the
//! processed counter meaningful.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use quill_core::QuillError;

#[derive(Debug)]
struct UserState {
    semaphore: Arc<Semaphore>,
    active: usize,
    queued: usize,
    processed: u64,
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct LimiterStats {
    pub max_concurrent_per_user: usize,
    pub total_users_tracked: usize,
    pub total_active: usize,
    pub total_queued: usize,
    pub total_processed: u64,
}

pub struct ConcurrencyLimiter {
    users: Mutex<HashMap<i64, Arc<Mutex<UserState>>>>,
    max_concurrent: usize,
    queue_timeout: Duration,
}

/// RAII slot: dropping it releases the semaphore and updates counters.
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<Mutex<UserState>>,
    user_id: i64,
    /// 0 = entered immediately; >0 = position it waited at.
    pub queue_position: usize,
}

impl Drop for ConcurrencyPermit {
    fn drop(&mut self) {
        let mut state = self.state.lock().expect("limiter state poisoned");
        state.active = state.active.saturating_sub(1);
        state.processed += 1;
        debug!(
            user_id = self.user_id,
            active = state.active,
            processed = state.processed,
            "generation slot released"
        );
    }
}

impl ConcurrencyLimiter {
    pub fn new(max_concurrent: usize, queue_timeout: Duration) -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            max_concurrent,
            queue_timeout,
        }
    }

    fn user_state(&self, user_id: i64) -> Arc<Mutex<UserState>> {
        let mut users = self.users.lock().expect("limiter map poisoned");
        Arc::clone(users.entry(user_id).or_insert_with(|| {
            Arc::new(Mutex::new(UserState {
                semaphore: Arc::new(Semaphore::new(self.max_concurrent)),
                active: 0,
                queued: 0,
                processed: 0,
            }))
        }))
    }

    /// Acquire a generation slot, waiting up to the queue timeout.
    pub async fn acquire(
        &self,
        user_id: i64,
        thread_id: i64,
    ) -> Result<ConcurrencyPermit, QuillError> {
        let state = self.user_state(user_id);
        let wait_start = Instant::now();

        let (semaphore, queue_position) = {
            let mut s = state.lock().expect("limiter state poisoned");
            let position = if s.active >= self.max_concurrent {
                s.queued += 1;
                let position = s.queued;
                info!(
                    user_id,
                    thread_id,
                    queue_position = position,
                    active = s.active,
                    "generation queued"
                );
                position
            } else {
                0
            };
            (Arc::clone(&s.semaphore), position)
        };

        let permit = match tokio::time::timeout(
            self.queue_timeout,
            Arc::clone(&semaphore).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                // semaphore closed — treated as a timeout; never happens in practice
                return Err(self.timed_out(&state, user_id, thread_id, queue_position, wait_start));
            }
            Err(_) => {
                return Err(self.timed_out(&state, user_id, thread_id, queue_position, wait_start));
            }
        };

        let waited = wait_start.elapsed();
        {
            let mut s = state.lock().expect("limiter state poisoned");
            s.active += 1;
            if queue_position > 0 {
                s.queued = s.queued.saturating_sub(1);
            }
            info!(
                user_id,
                thread_id,
                queue_position,
                wait_ms = waited.as_millis() as u64,
                active = s.active,
                "generation slot acquired"
            );
        }

        Ok(ConcurrencyPermit {
            _permit: permit,
            state,
            user_id,
            queue_position,
        })
    }

    fn timed_out(
        &self,
        state: &Arc<Mutex<UserState>>,
        user_id: i64,
        thread_id: i64,
        queue_position: usize,
        wait_start: Instant,
    ) -> QuillError {
        let waited = wait_start.elapsed();
        {
            let mut s = state.lock().expect("limiter state poisoned");
            s.queued = s.queued.saturating_sub(1);
        }
        warn!(
            user_id,
            thread_id,
            queue_position,
            waited_s = waited.as_secs_f64(),
            "concurrency queue timeout"
        );
        QuillError::ConcurrencyLimitExceeded {
            queue_position,
            waited_secs: waited.as_secs_f64(),
        }
    }

    /// 0 means a request would enter immediately.
    pub fn queue_position(&self, user_id: i64) -> usize {
        let users = self.users.lock().expect("limiter map poisoned");
        match users.get(&user_id) {
            None => 0,
            Some(state) => {
                let s = state.lock().expect("limiter state poisoned");
                if s.active < self.max_concurrent {
                    0
                } else {
                    s.queued + 1
                }
            }
        }
    }

    pub fn active_count(&self, user_id: i64) -> usize {
        let users = self.users.lock().expect("limiter map poisoned");
        users
            .get(&user_id)
            .map(|s| s.lock().expect("limiter state poisoned").active)
            .unwrap_or(0)
    }

    pub fn stats(&self) -> LimiterStats {
        let users = self.users.lock().expect("limiter map poisoned");
        let mut total_active = 0;
        let mut total_queued = 0;
        let mut total_processed = 0;
        for state in users.values() {
            let s = state.lock().expect("limiter state poisoned");
            total_active += s.active;
            total_queued += s.queued;
            total_processed += s.processed;
        }
        LimiterStats {
            max_concurrent_per_user: self.max_concurrent,
            total_users_tracked: users.len(),
            total_active,
            total_queued,
            total_processed,
        }
    }
}
