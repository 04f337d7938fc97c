use std::{ops::Deref, time::Duration};

use crate::RateComplianceError;

/// Deadline value meaning "no compliant call yet".
pub(crate) const UNARMED: u64 = u64::MAX;

/// Deadline value for a window that never reopens.
pub(crate) const NEVER: u64 = UNARMED - 1;

/// Cooldown window in milliseconds, measured from the last compliant call.
///
/// Defaults to `0`: with no cooldown every call is compliant as long as the clock
/// has moved past the previous compliant call.
///
/// A delay that pushes the deadline past the end of the clock's range closes the
/// window for good: every later call is anti-compliant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CooldownMs(u64);

impl CooldownMs {
    /// Cooldown of zero milliseconds.
    pub const ZERO: Self = Self(0);

    /// Deadline for a compliant call made at `now_ms`.
    ///
    /// Saturates at [`NEVER`] so an armed gate can never read as cold.
    pub(crate) fn deadline_from(&self, now_ms: u64) -> u64 {
        now_ms.saturating_add(self.0).min(NEVER)
    }
}

impl Deref for CooldownMs {
    type Target = u64;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u64> for CooldownMs {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Duration> for CooldownMs {
    fn from(value: Duration) -> Self {
        Self(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }
}

impl TryFrom<i64> for CooldownMs {
    type Error = RateComplianceError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u64::try_from(value).map(Self).map_err(|_| {
            RateComplianceError::InvalidCooldownMs(
                "Cooldown delay must not be negative".to_string(),
            )
        })
    }
}

impl TryFrom<f64> for CooldownMs {
    type Error = RateComplianceError;

    /// Fractional milliseconds are truncated.
    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() {
            return Err(RateComplianceError::InvalidCooldownMs(
                "Cooldown delay must be a finite number".to_string(),
            ));
        }

        if value < 0f64 {
            return Err(RateComplianceError::InvalidCooldownMs(
                "Cooldown delay must not be negative".to_string(),
            ));
        }

        Ok(Self(value as u64))
    }
}

/// Classification of a single invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compliance {
    /// First call, or a call made strictly after the cooldown deadline.
    ///
    /// Runs the `compliant` stage and arms a new deadline.
    Compliant,
    /// Call made at or before the current deadline.
    ///
    /// Runs the `anti_compliant` stage; the deadline is left as is.
    AntiCompliant,
}

impl Compliance {
    /// Whether this is [`Compliance::Compliant`].
    pub fn is_compliant(&self) -> bool {
        matches!(self, Compliance::Compliant)
    }
}

/// Classify against a stored deadline and arm a new one when compliant.
///
/// Classification and arming happen in one compare-and-swap loop, so two callers
/// racing on the same deadline cannot both come out compliant.
pub(crate) fn classify_deadline(
    next_eligible_ms: &std::sync::atomic::AtomicU64,
    now_ms: u64,
    delay: CooldownMs,
) -> Compliance {
    use std::sync::atomic::Ordering;

    let mut current = next_eligible_ms.load(Ordering::Acquire);

    loop {
        if current != UNARMED && (now_ms <= current || current == NEVER) {
            tracing::trace!(
                now_ms,
                next_eligible_ms = current,
                delay_ms = *delay,
                "rate_compliance.anti_compliant"
            );
            return Compliance::AntiCompliant;
        }

        let next = delay.deadline_from(now_ms);

        match next_eligible_ms.compare_exchange_weak(
            current,
            next,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                tracing::trace!(
                    now_ms,
                    next_eligible_ms = next,
                    delay_ms = *delay,
                    "rate_compliance.compliant"
                );
                return Compliance::Compliant;
            }
            Err(observed) => current = observed,
        }
    }
} // end fn classify_deadline
