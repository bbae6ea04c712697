//! Jittered refresh interval computation.

use std::time::Duration;

use crate::config::RefreshSource;

/// Computes jittered refresh intervals for one source.
///
/// Scheduled fetches are randomized to avoid thundering herds across a
/// fleet of clients polling the same key server. The window around the
/// configured interval is precomputed at construction.
#[derive(Clone, Debug)]
pub(crate) struct Jitterer {
    interval_lo: u64,
    interval_hi: u64,
    min_interval: Duration,

    // Multiplier producing the low end of the TTL-anchored window. Doubled
    // jitter, so the sampled interval never exceeds the TTL itself.
    ttl_lo_multiplier: f64,
}

impl Jitterer {
    pub(crate) fn new(source: &RefreshSource) -> Self {
        let interval = nanos(source.effective_interval());
        let jitter = source.effective_jitter();

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let interval_lo = ((1.0 - jitter) * interval as f64) as u64;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let interval_hi = ((1.0 + jitter) * interval as f64) as u64;

        Self {
            interval_lo,
            interval_hi,
            min_interval: source.effective_min_interval(),
            ttl_lo_multiplier: 1.0 - 2.0 * jitter,
        }
    }

    /// Computes the time until the next refresh.
    ///
    /// When the previous fetch failed, or the server advertised no TTL, the
    /// interval is sampled around the configured base interval. When a TTL
    /// is known, the interval is sampled from a window anchored below the
    /// TTL, so the next refresh lands before the content expires. Either
    /// way the result is floored at the source's minimum interval.
    pub(crate) fn next_interval(&self, ttl: Option<Duration>, errored: bool) -> Duration {
        let sampled = match ttl {
            Some(ttl) if !errored && !ttl.is_zero() => {
                let ttl = nanos(ttl);
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let lo = (self.ttl_lo_multiplier * ttl as f64).max(0.0) as u64;
                fastrand::u64(lo..=ttl)
            }
            _ => fastrand::u64(self.interval_lo..=self.interval_hi),
        };

        Duration::from_nanos(sampled).max(self.min_interval)
    }
}

fn nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
