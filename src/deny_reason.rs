use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Why an admission or reservation was refused.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum DenyReason {
    /// More tokens requested than the bucket can ever hold. Retrying is pointless.
    ExceedsBurst = 1,
    /// Not enough tokens now, and the wait would exceed the caller's bound.
    Exhausted = 2,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::ExceedsBurst => "exceeds_burst",
            DenyReason::Exhausted => "exhausted",
        }
    }

    /// `false` when the same request can never be admitted.
    pub fn is_transient(&self) -> bool {
        matches!(self, DenyReason::Exhausted)
    }
}

static LAST_DENIAL: Lazy<RwLock<HashMap<String, DenyReason>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// Record the latest denial for a route. Sticky: admissions do not clear it.
pub fn set_last_denial(route: &str, reason: DenyReason) {
    LAST_DENIAL.write().insert(route.to_string(), reason);
}

pub fn get_last_denial(route: &str) -> Option<DenyReason> {
    LAST_DENIAL.read().get(route).copied()
}

/// Render for status output; "-" when the route was never denied.
pub fn last_denial_str(route: &str) -> &'static str {
    get_last_denial(route).map(|r| r.as_str()).unwrap_or("-")
}
