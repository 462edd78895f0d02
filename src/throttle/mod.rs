use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// `N` requests per `duration_seconds`, written `N/period`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleRate {
    pub num_requests: u32,
    pub duration_seconds: i64,
}

impl ThrottleRate {
    pub fn new(num_requests: u32, duration_seconds: i64) -> Self {
        Self {
            num_requests,
            duration_seconds,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ThrottleRateError {
    #[error("expected <count>/<period>")]
    Format,
    #[error("invalid request count: {0}")]
    Count(String),
    #[error("unknown period {0:?}, expected s, m, h or d")]
    Period(String),
}

impl FromStr for ThrottleRate {
    type Err = ThrottleRateError;

    /// Only the first letter of the period is significant: `10/min` == `10/m`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (count, period) = s.trim().split_once('/').ok_or(ThrottleRateError::Format)?;
        let num_requests = count
            .trim()
            .parse()
            .map_err(|_| ThrottleRateError::Count(count.to_string()))?;
        let duration_seconds = match period.trim().chars().next() {
            Some('s') => 1,
            Some('m') => 60,
            Some('h') => 3600,
            Some('d') => 86_400,
            _ => return Err(ThrottleRateError::Period(period.to_string())),
        };
        Ok(Self::new(num_requests, duration_seconds))
    }
}

impl fmt::Display for ThrottleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let period = match self.duration_seconds {
            1 => "second",
            60 => "minute",
            3600 => "hour",
            _ => "day",
        };
        write!(f, "{}/{}", self.num_requests, period)
    }
}

/// Which requests a throttle applies to and how it keys them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ThrottleClass {
    /// Anonymous requests only, keyed by client address
    Anon,
    /// Every request, keyed by user id or by client address when anonymous
    User,
}

impl ThrottleClass {
    pub fn scope(&self) -> &'static str {
        match self {
            ThrottleClass::Anon => "anon",
            ThrottleClass::User => "user",
        }
    }

    /// Cache key for this request, `None` when the throttle does not apply
    pub fn cache_key(&self, user_id: Option<i64>, client_ip: &str) -> Option<String> {
        match (self, user_id) {
            (ThrottleClass::Anon, Some(_)) => None,
            (ThrottleClass::Anon, None) | (ThrottleClass::User, None) => {
                Some(format!("throttle_{}_{}", self.scope(), client_ip))
            }
            (ThrottleClass::User, Some(id)) => Some(format!("throttle_{}_{}", self.scope(), id)),
        }
    }
}

impl FromStr for ThrottleClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anon" | "anonratethrottle" => Ok(ThrottleClass::Anon),
            "user" | "userratethrottle" => Ok(ThrottleClass::User),
            other => Err(format!("unknown throttle class {:?}", other)),
        }
    }
}

/// Request history per key (in-memory, per process)
#[derive(Default)]
pub struct ThrottleStore {
    history: HashMap<String, Vec<i64>>,
}

impl ThrottleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request at `now` (unix seconds) if the key is under its rate.
    /// Returns the number of seconds to wait when it is not.
    pub fn check(&mut self, key: &str, rate: ThrottleRate, now: i64) -> Result<(), u64> {
        let window_start = now - rate.duration_seconds;
        let requests = self.history.entry(key.to_string()).or_default();

        // Remove old requests outside the window
        requests.retain(|&timestamp| timestamp > window_start);

        if requests.len() >= rate.num_requests as usize {
            let oldest = requests.first().copied().unwrap_or(now);
            let wait = (rate.duration_seconds - (now - oldest)).max(1);
            return Err(u64::try_from(wait).unwrap_or(1));
        }

        requests.push(now);
        Ok(())
    }

    /// Forget keys with no requests in the last `max_age_seconds`
    pub fn cleanup(&mut self, now: i64, max_age_seconds: i64) {
        let cutoff = now - max_age_seconds;
        self.history.retain(|_, timestamps| {
            timestamps.retain(|&timestamp| timestamp > cutoff);
            !timestamps.is_empty()
        });
    }

    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rest_framework_rates() {
        assert_eq!("100/day".parse(), Ok(ThrottleRate::new(100, 86_400)));
        assert_eq!("5/min".parse(), Ok(ThrottleRate::new(5, 60)));
        assert_eq!(" 3 / s ".parse(), Ok(ThrottleRate::new(3, 1)));
        assert_eq!("10/hour".parse(), Ok(ThrottleRate::new(10, 3600)));
        assert_eq!("10".parse::<ThrottleRate>(), Err(ThrottleRateError::Format));
        assert!(matches!("ten/day".parse::<ThrottleRate>(), Err(ThrottleRateError::Count(_))));
        assert!(matches!("10/week".parse::<ThrottleRate>(), Err(ThrottleRateError::Period(_))));
    }

    #[test]
    fn rate_display_round_trips_through_config() {
        let rate = ThrottleRate::new(1000, 86_400);
        assert_eq!(rate.to_string(), "1000/day");
        assert_eq!(rate.to_string().parse(), Ok(rate));
    }

    #[test]
    fn user_throttle_keys_by_user_then_ip() {
        assert_eq!(
            ThrottleClass::User.cache_key(Some(7), "10.0.0.1").as_deref(),
            Some("throttle_user_7")
        );
        assert_eq!(
            ThrottleClass::User.cache_key(None, "10.0.0.1").as_deref(),
            Some("throttle_user_10.0.0.1")
        );
        assert_eq!(ThrottleClass::Anon.cache_key(Some(7), "10.0.0.1"), None);
    }

    #[test]
    fn window_blocks_then_recovers() {
        let mut store = ThrottleStore::new();
        let rate = ThrottleRate::new(2, 60);

        assert!(store.check("k", rate, 1000).is_ok());
        assert!(store.check("k", rate, 1010).is_ok());
        assert_eq!(store.check("k", rate, 1020), Err(40));
        // other keys are independent
        assert!(store.check("other", rate, 1020).is_ok());
        // first request leaves the window
        assert!(store.check("k", rate, 1061).is_ok());
    }

    #[test]
    fn cleanup_drops_idle_keys() {
        let mut store = ThrottleStore::new();
        let rate = ThrottleRate::new(10, 60);
        store.check("idle", rate, 0).unwrap();
        store.check("busy", rate, 5000).unwrap();
        store.cleanup(5000, 3600);
        assert_eq!(store.tracked_keys(), 1);
    }
}
