//! Thread-safe token bucket limiter.
//!
//! Every decision runs in two phases: [`propose`] computes the candidate
//! bucket state for a request without touching shared state, then the
//! [`Limiter`] writes it back under its lock only when the request is
//! granted. Rejected requests therefore never consume capacity.

use crate::deny_reason::DenyReason;
use crate::limit::{Limit, INF_DURATION};
use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::trace;

/// Mutable bucket state: balance plus the instant it was last brought up to date.
///
/// `last` may lie in the future after a reservation that had to wait; the
/// balance is then zero and becomes positive again only after `last`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Bucket {
    pub tokens: f64,
    pub last: Option<Instant>,
}

/// Candidate outcome of one request, produced by [`propose`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Proposal {
    pub ok: bool,
    pub delay: Duration,
    pub reason: Option<DenyReason>,
    /// State to commit if `ok`; equal to the input bucket otherwise.
    pub next: Bucket,
}

impl Proposal {
    fn granted(delay: Duration, next: Bucket) -> Self {
        Self { ok: true, delay, reason: None, next }
    }

    fn denied(bucket: &Bucket, reason: DenyReason, delay: Duration) -> Self {
        Self { ok: false, delay, reason: Some(reason), next: *bucket }
    }
}

/// Bring the bucket up to `now`. Returns the instant the balance is valid
/// at (never before `last`) and the balance itself.
///
/// A `now` earlier than `last` contributes no elapsed time. Elapsed time
/// beyond what fills the bucket contributes nothing either, so the balance
/// tops out at exactly `burst`.
fn advance(bucket: &Bucket, limit: Limit, burst: usize, now: Instant) -> (Instant, f64) {
    let cap = burst as f64;
    let current = bucket.tokens.clamp(0.0, cap);
    let (base, elapsed) = match bucket.last {
        None => (now, INF_DURATION),
        Some(last) if now < last => (last, Duration::ZERO),
        Some(last) => (now, now - last),
    };
    let fill_horizon = limit.tokens_to_duration(cap - current);
    let tokens = if elapsed >= fill_horizon {
        cap
    } else {
        (current + limit.duration_to_tokens(elapsed)).min(cap)
    };
    (base, tokens)
}

/// Decide whether `n` tokens can be had at `now` within `max_wait`.
pub fn propose(
    bucket: &Bucket,
    limit: Limit,
    burst: usize,
    now: Instant,
    n: usize,
    max_wait: Duration,
) -> Proposal {
    if n == 0 {
        return Proposal::granted(Duration::ZERO, *bucket);
    }
    if limit.is_unlimited() {
        let last = bucket.last.map_or(now, |last| last.max(now));
        return Proposal::granted(Duration::ZERO, Bucket { tokens: bucket.tokens, last: Some(last) });
    }
    if n > burst {
        return Proposal::denied(bucket, DenyReason::ExceedsBurst, INF_DURATION);
    }

    let (base, tokens) = advance(bucket, limit, burst, now);
    let remaining = tokens - n as f64;
    if remaining >= 0.0 {
        return Proposal::granted(Duration::ZERO, Bucket { tokens: remaining, last: Some(base) });
    }

    // Short of tokens: the request can act once the deficit has refilled,
    // counted from `base` so outstanding reservations are paid off first.
    let refill = limit.tokens_to_duration(-remaining);
    let Some(act_at) = base.checked_add(refill) else {
        return Proposal::denied(bucket, DenyReason::Exhausted, INF_DURATION);
    };
    let delay = act_at.saturating_duration_since(now);
    if delay > max_wait {
        return Proposal::denied(bucket, DenyReason::Exhausted, delay);
    }
    Proposal::granted(delay, Bucket { tokens: 0.0, last: Some(act_at) })
}

/// Result of a reservation request.
#[derive(Clone, Copy, Debug)]
pub struct Reservation {
    ok: bool,
    delay: Duration,
    act_at: Option<Instant>,
    reason: Option<DenyReason>,
}

impl Reservation {
    fn from_proposal(now: Instant, p: &Proposal) -> Self {
        Self {
            ok: p.ok,
            delay: p.delay,
            act_at: if p.ok { now.checked_add(p.delay) } else { None },
            reason: p.reason,
        }
    }

    pub fn ok(&self) -> bool { self.ok }

    /// Wait owed from the instant the reservation was made. For a denied
    /// reservation this is the wait that exceeded the bound.
    pub fn delay(&self) -> Duration { self.delay }

    pub fn reason(&self) -> Option<DenyReason> { self.reason }

    /// When the reserved events may happen. `None` if not ok.
    pub fn time_to_act(&self) -> Option<Instant> { self.act_at }

    /// Remaining wait as seen from `now`; [`INF_DURATION`] if not ok.
    pub fn delay_from(&self, now: Instant) -> Duration {
        match self.act_at {
            Some(at) => at.saturating_duration_since(now),
            None => INF_DURATION,
        }
    }
}

#[derive(Debug)]
struct Inner {
    limit: Limit,
    burst: usize,
    bucket: Bucket,
}

/// Token bucket rate limiter shared by reference across threads.
///
/// Starts with no tokens and no update time; the first request sees the
/// bucket as idle forever and therefore full.
#[derive(Debug)]
pub struct Limiter {
    inner: Mutex<Inner>,
}

impl Limiter {
    pub fn new(limit: Limit, burst: usize) -> Self {
        Self { inner: Mutex::new(Inner { limit, burst, bucket: Bucket::default() }) }
    }

    pub fn limit(&self) -> Limit { self.inner.lock().limit }

    pub fn burst(&self) -> usize { self.inner.lock().burst }

    /// Tokens available at `now`, without changing state.
    pub fn tokens_at(&self, now: Instant) -> f64 {
        let g = self.inner.lock();
        if g.limit.is_unlimited() {
            return g.burst as f64;
        }
        advance(&g.bucket, g.limit, g.burst, now).1
    }

    pub fn set_limit(&self, limit: Limit) { self.set_limit_at(Instant::now(), limit) }

    /// Replace the rate. Tokens earned up to `now` are credited at the old rate
    /// first. Leaving `Unlimited` starts from a full bucket, like a new limiter.
    pub fn set_limit_at(&self, now: Instant, limit: Limit) {
        let mut g = self.inner.lock();
        let mut bucket = settle(&g, now);
        if g.limit.is_unlimited() && !limit.is_unlimited() {
            bucket.tokens = g.burst as f64;
        }
        g.bucket = bucket;
        g.limit = limit;
    }

    pub fn set_burst(&self, burst: usize) { self.set_burst_at(Instant::now(), burst) }

    /// Replace the capacity, trimming the balance if it no longer fits.
    pub fn set_burst_at(&self, now: Instant, burst: usize) {
        let mut g = self.inner.lock();
        let mut bucket = settle(&g, now);
        bucket.tokens = bucket.tokens.min(burst as f64);
        g.bucket = bucket;
        g.burst = burst;
    }

    pub fn allow(&self) -> bool { self.allow_n(Instant::now(), 1) }

    /// Whether `n` events may happen at `now`. Use this when excess events
    /// are dropped rather than delayed.
    pub fn allow_n(&self, now: Instant, n: usize) -> bool {
        self.reserve_n_within(now, n, Duration::ZERO).ok()
    }

    pub fn reserve(&self) -> Reservation { self.reserve_n(Instant::now(), 1) }

    /// Reserve `n` tokens with no bound on the wait. Fails only when `n`
    /// exceeds the burst or the rate can never produce the tokens.
    pub fn reserve_n(&self, now: Instant, n: usize) -> Reservation {
        self.reserve_n_within(now, n, INF_DURATION)
    }

    /// Reserve `n` tokens if they will be available within `max_wait` of `now`.
    /// A granted reservation holds its tokens; the caller does the waiting.
    pub fn reserve_n_within(&self, now: Instant, n: usize, max_wait: Duration) -> Reservation {
        let mut g = self.inner.lock();
        let p = propose(&g.bucket, g.limit, g.burst, now, n, max_wait);
        if p.ok {
            g.bucket = p.next;
        } else if let Some(reason) = p.reason {
            trace!(n, burst = g.burst, reason = reason.as_str(), "token request denied");
        }
        Reservation::from_proposal(now, &p)
    }

    #[cfg(test)]
    pub(crate) fn bucket(&self) -> Bucket { self.inner.lock().bucket }
}

fn settle(inner: &Inner, now: Instant) -> Bucket {
    if inner.limit.is_unlimited() {
        let last = inner.bucket.last.map_or(now, |last| last.max(now));
        return Bucket { tokens: inner.bucket.tokens, last: Some(last) };
    }
    let (base, tokens) = advance(&inner.bucket, inner.limit, inner.burst, now);
    Bucket { tokens, last: Some(base) }
}
