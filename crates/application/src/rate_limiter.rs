//! 进程级令牌桶准入控制。
//!
//! 每个入站请求调用一次 [`RateLimiter::allow`]。补充令牌采用粗粒度方式：
//! 只按经过的整数个补充间隔加令牌，并把 `last_refill` 推进到当前时刻，
//! 不足一个间隔的进度直接丢弃。

use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

/// 令牌桶状态，只在互斥锁内读写
#[derive(Debug)]
struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

/// 令牌桶限流器
///
/// 进程启动时创建一次，整个生命周期共享。拒绝不是错误，`allow()` 返回 `false` 即可，
/// 由边缘中间件转换为 "too many requests" 响应。
#[derive(Debug)]
pub struct RateLimiter {
    /// 桶容量（最大令牌数）
    capacity: u32,
    /// 每补充一个令牌所需的时间
    refill_interval: Duration,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// 创建满桶的限流器
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        // 零间隔会导致除零，至少按 1ns 计
        let refill_interval = refill_interval.max(Duration::from_nanos(1));
        Self {
            capacity,
            refill_interval,
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// 判断当前请求能否放行，非阻塞、O(1)
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut bucket = self.bucket.lock().unwrap_or_else(PoisonError::into_inner);

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let intervals = elapsed.as_nanos() / self.refill_interval.as_nanos();
        if intervals > 0 {
            let refill = u32::try_from(intervals).unwrap_or(u32::MAX);
            bucket.tokens = bucket.tokens.saturating_add(refill).min(self.capacity);
            bucket.last_refill = now;
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// 当前剩余令牌数快照（不触发补充）
    pub fn available(&self) -> u32 {
        self.bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn refill_interval(&self) -> Duration {
        self.refill_interval
    }
}
