use std::collections::VecDeque;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, SemaphorePermit};

#[derive(Debug, Clone)]
pub struct GovernorSettings {
    pub initial_limit: usize,
    pub max_limit: usize,
    pub window: usize,
    pub fast_threshold: Duration,
    pub slow_threshold: Duration,
    pub adaptive: bool,
}

impl GovernorSettings {
    /// 固定上限，不做調整
    pub fn fixed(limit: usize) -> Self {
        Self {
            initial_limit: limit.max(1),
            max_limit: limit.max(1),
            adaptive: false,
            ..Self::default()
        }
    }

    /// 以 `limit` 起跳，最多放大到四倍
    pub fn adaptive(limit: usize) -> Self {
        Self {
            initial_limit: limit.max(1),
            max_limit: limit.max(1) * 4,
            adaptive: true,
            ..Self::default()
        }
    }
}

impl Default for GovernorSettings {
    fn default() -> Self {
        Self {
            initial_limit: 5,
            max_limit: 20,
            window: 10,
            fast_threshold: Duration::from_secs(1),
            slow_threshold: Duration::from_secs(3),
            adaptive: true,
        }
    }
}

#[derive(Debug)]
struct GovernorState {
    limit: usize,
    window: VecDeque<Duration>,
    pending_shrink: usize,
}

/// 依最近任務耗時調整並行上限的限流器。
///
/// 視窗填滿時計算平均耗時：低於 fast 則上限加倍，高於 slow 則降為 2/3（至少 1）。
/// 縮小時不回收正在使用的許可，而是在之後的任務結束時丟棄對應數量的許可。
#[derive(Debug)]
pub struct DynamicGovernor {
    semaphore: Semaphore,
    state: Mutex<GovernorState>,
    settings: GovernorSettings,
}

impl DynamicGovernor {
    pub fn new(settings: GovernorSettings) -> Self {
        let limit = settings.initial_limit.max(1);
        Self {
            semaphore: Semaphore::new(limit),
            state: Mutex::new(GovernorState {
                limit,
                window: VecDeque::with_capacity(settings.window),
                pending_shrink: 0,
            }),
            settings,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GovernorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current_limit(&self) -> usize {
        self.lock().limit
    }

    /// 調整後可能達到的最大並行數
    pub fn max_limit(&self) -> usize {
        self.settings.max_limit.max(self.settings.initial_limit).max(1)
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// 在限流下執行一個任務
    pub async fn run<F: Future>(&self, fut: F) -> F::Output {
        let permit = match self.semaphore.acquire().await {
            Ok(permit) => Some(permit),
            Err(e) => {
                tracing::warn!("⚠️ Governor semaphore closed, running unthrottled: {}", e);
                None
            }
        };
        let started = Instant::now();
        let output = fut.await;
        self.finish(started.elapsed(), permit);
        output
    }

    fn finish(&self, elapsed: Duration, permit: Option<SemaphorePermit<'_>>) {
        let forget = {
            let mut state = self.lock();
            if state.pending_shrink > 0 {
                state.pending_shrink -= 1;
                true
            } else {
                false
            }
        };
        if let Some(permit) = permit {
            if forget {
                permit.forget();
            }
        }
        if self.settings.adaptive {
            self.record(elapsed);
        }
    }

    /// 記錄一筆耗時，回傳調整後的上限
    pub fn record(&self, elapsed: Duration) -> usize {
        let mut state = self.lock();
        state.window.push_back(elapsed);
        if state.window.len() < self.settings.window.max(1) {
            return state.limit;
        }

        let total: Duration = state.window.iter().sum();
        let average = total / state.window.len() as u32;
        state.window.clear();

        let old = state.limit;
        let new = if average < self.settings.fast_threshold {
            (old * 2).min(self.settings.max_limit.max(1))
        } else if average > self.settings.slow_threshold {
            (old * 2 / 3).max(1)
        } else {
            old
        };

        if new > old {
            let mut grow = new - old;
            let offset = grow.min(state.pending_shrink);
            state.pending_shrink -= offset;
            grow -= offset;
            if grow > 0 {
                self.semaphore.add_permits(grow);
            }
        } else if new < old {
            state.pending_shrink += old - new;
        }

        if new != old {
            tracing::debug!(
                "⚖️ Concurrency limit {} → {} (avg task {:?})",
                old,
                new,
                average
            );
        }
        state.limit = new;
        new
    }
}
