use std::fmt;

use serde::Serialize;

use crate::keys::models::{GatewayApiKey, KeyLimits};
use crate::usage::{UsageSnapshot, UsageWindow};

/// key: gateway-keys-violated-limit
/// Which ceiling stopped a request. Internal detail; callers only see a generic
/// rate-limit response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolatedLimit {
    SoftBlocked,
    Requests {
        window: UsageWindow,
        cap: i64,
        used: i64,
    },
    Cost {
        window: UsageWindow,
        cap: i64,
        used: i64,
    },
}

impl fmt::Display for ViolatedLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolatedLimit::SoftBlocked => f.write_str("soft block"),
            ViolatedLimit::Requests { window, cap, used } => {
                write!(f, "{} requests {used}/{cap}", window.as_str())
            }
            ViolatedLimit::Cost { window, cap, used } => {
                write!(f, "{} cost {used}/{cap}", window.as_str())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct LimitDecision {
    pub within_limits: bool,
    pub violated: Option<ViolatedLimit>,
}

impl LimitDecision {
    fn allow() -> Self {
        Self {
            within_limits: true,
            violated: None,
        }
    }

    fn deny(violated: ViolatedLimit) -> Self {
        Self {
            within_limits: false,
            violated: Some(violated),
        }
    }
}

/// key: gateway-keys-limit-policy
/// Pure comparison of configured ceilings against accumulated usage. A cap is
/// exhausted once usage has reached it.
#[derive(Clone, Copy, Debug, Default)]
pub struct LimitPolicy;

impl LimitPolicy {
    pub fn evaluate(&self, key: &GatewayApiKey, usage: &UsageSnapshot) -> LimitDecision {
        self.evaluate_limits(&key.limits, usage)
    }

    pub fn evaluate_limits(&self, limits: &KeyLimits, usage: &UsageSnapshot) -> LimitDecision {
        if limits.soft_blocked {
            return LimitDecision::deny(ViolatedLimit::SoftBlocked);
        }
        for window in UsageWindow::ALL {
            let used = usage.window(window);
            if let Some(cap) = limits.request_cap(window) {
                if used.requests >= cap {
                    return LimitDecision::deny(ViolatedLimit::Requests {
                        window,
                        cap,
                        used: used.requests,
                    });
                }
            }
            if let Some(cap) = limits.cost_cap(window) {
                if used.cost_minor >= cap {
                    return LimitDecision::deny(ViolatedLimit::Cost {
                        window,
                        cap,
                        used: used.cost_minor,
                    });
                }
            }
        }
        LimitDecision::allow()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::WindowUsage;

    fn usage(requests: i64, cost_minor: i64) -> WindowUsage {
        WindowUsage {
            requests,
            cost_minor,
        }
    }

    #[test]
    fn unset_caps_never_block() {
        let snapshot = UsageSnapshot {
            daily: usage(1_000_000, 9_999_999),
            weekly: usage(1_000_000, 9_999_999),
            monthly: usage(1_000_000, 9_999_999),
        };
        let decision = LimitPolicy.evaluate_limits(&KeyLimits::default(), &snapshot);
        assert!(decision.within_limits);
        assert_eq!(decision.violated, None);
    }

    #[test]
    fn soft_block_ignores_counters() {
        let limits = KeyLimits {
            soft_blocked: true,
            ..KeyLimits::default()
        };
        let decision = LimitPolicy.evaluate_limits(&limits, &UsageSnapshot::default());
        assert!(!decision.within_limits);
        assert_eq!(decision.violated, Some(ViolatedLimit::SoftBlocked));
    }

    #[test]
    fn request_cap_trips_once_reached() {
        let limits = KeyLimits {
            weekly_requests: Some(10),
            ..KeyLimits::default()
        };
        let mut snapshot = UsageSnapshot::default();
        snapshot.weekly = usage(9, 0);
        assert!(LimitPolicy.evaluate_limits(&limits, &snapshot).within_limits);

        snapshot.weekly = usage(10, 0);
        assert_eq!(
            LimitPolicy.evaluate_limits(&limits, &snapshot).violated,
            Some(ViolatedLimit::Requests {
                window: UsageWindow::Weekly,
                cap: 10,
                used: 10
            })
        );
    }

    #[test]
    fn cost_cap_uses_minor_units() {
        let limits = KeyLimits {
            monthly_cost_minor: Some(2_500),
            ..KeyLimits::default()
        };
        let mut snapshot = UsageSnapshot::default();
        snapshot.monthly = usage(3, 2_499);
        assert!(LimitPolicy.evaluate_limits(&limits, &snapshot).within_limits);
        snapshot.monthly = usage(3, 2_501);
        assert!(matches!(
            LimitPolicy.evaluate_limits(&limits, &snapshot).violated,
            Some(ViolatedLimit::Cost {
                window: UsageWindow::Monthly,
                ..
            })
        ));
    }

    #[test]
    fn daily_window_is_checked_first() {
        let limits = KeyLimits {
            daily_requests: Some(1),
            monthly_requests: Some(1),
            ..KeyLimits::default()
        };
        let snapshot = UsageSnapshot {
            daily: usage(1, 0),
            weekly: usage(1, 0),
            monthly: usage(1, 0),
        };
        assert!(matches!(
            LimitPolicy.evaluate_limits(&limits, &snapshot).violated,
            Some(ViolatedLimit::Requests {
                window: UsageWindow::Daily,
                ..
            })
        ));
    }

    #[test]
    fn zero_cap_blocks_everything() {
        let limits = KeyLimits {
            daily_cost_minor: Some(0),
            ..KeyLimits::default()
        };
        assert!(!LimitPolicy
            .evaluate_limits(&limits, &UsageSnapshot::default())
            .within_limits);
    }
}
