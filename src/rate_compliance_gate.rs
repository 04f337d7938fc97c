use std::{
    convert::Infallible,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use crate::{
    Clock, Compliance, CooldownMs, Stage, SystemClock,
    common::{UNARMED, classify_deadline},
    stage::Pipeline,
};

/// Configuration for [`RateComplianceGate`] and
/// [`KeyedRateComplianceGate`](crate::KeyedRateComplianceGate).
///
/// Every field is optional in spirit: [`Default`] gives a zero cooldown, no
/// stages and a [`SystemClock`].
pub struct RateComplianceOptions<T, A = (), E = Infallible> {
    /// Cooldown window after a compliant call.
    pub delay: CooldownMs,
    /// Runs on every call, first.
    pub before: Stage<T, A, E>,
    /// Runs on compliant calls, second.
    pub compliant: Stage<T, A, E>,
    /// Runs on anti-compliant calls, second.
    pub anti_compliant: Stage<T, A, E>,
    /// Runs on every call, last.
    pub after: Stage<T, A, E>,
    /// Time source for classification.
    pub clock: Arc<dyn Clock>,
}

impl<T, A, E> Default for RateComplianceOptions<T, A, E> {
    fn default() -> Self {
        Self {
            delay: CooldownMs::default(),
            before: Stage::Absent,
            compliant: Stage::Absent,
            anti_compliant: Stage::Absent,
            after: Stage::Absent,
            clock: Arc::new(SystemClock::new()),
        }
    }
}

impl<T: Clone, A, E> Clone for RateComplianceOptions<T, A, E> {
    fn clone(&self) -> Self {
        Self {
            delay: self.delay,
            before: self.before.clone(),
            compliant: self.compliant.clone(),
            anti_compliant: self.anti_compliant.clone(),
            after: self.after.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T: fmt::Debug, A, E> fmt::Debug for RateComplianceOptions<T, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateComplianceOptions")
            .field("delay", &self.delay)
            .field("before", &self.before)
            .field("compliant", &self.compliant)
            .field("anti_compliant", &self.anti_compliant)
            .field("after", &self.after)
            .finish_non_exhaustive()
    }
}

impl<T, A, E> RateComplianceOptions<T, A, E> {
    pub(crate) fn into_parts(self) -> (CooldownMs, Pipeline<T, A, E>, Arc<dyn Clock>) {
        (
            self.delay,
            Pipeline::new(self.before, self.compliant, self.anti_compliant, self.after),
            self.clock,
        )
    }
}

/// Cooldown gate in front of a three-stage callback chain.
///
/// Every call is classified before anything runs:
///
/// - **Compliant:** no compliant call happened yet, or `now > next_eligible`.
///   The deadline moves to `now + delay` and the chain is
///   `before -> compliant -> after`.
/// - **Anti-compliant:** `now <= next_eligible`. The deadline is untouched and the
///   chain is `before -> anti_compliant -> after`.
///
/// The boundary is strict: a call landing exactly on the deadline is
/// anti-compliant.
///
/// Each stage receives the previous stage's value (`None` for `before`) and a
/// reference to the call's arguments. The last value is the call's result.
///
/// # Thread Safety
///
/// The deadline is an atomic and classification is a compare-and-swap, so a gate
/// can be shared (e.g. behind an [`Arc`]) and called concurrently. At most one
/// caller per window is classified compliant. Stages run outside any lock, so a
/// stage may call back into its own gate and will see the updated deadline.
///
/// # Examples
///
/// ```
/// use rate_compliance::{CooldownMs, ManualClock, RateComplianceGate, RateComplianceOptions, Stage};
/// use std::sync::Arc;
///
/// let clock = ManualClock::new(0);
/// let gate: RateComplianceGate<&str> = RateComplianceGate::new(RateComplianceOptions {
///     delay: CooldownMs::from(100),
///     compliant: Stage::constant("C"),
///     anti_compliant: Stage::constant("A"),
///     clock: Arc::new(clock.clone()),
///     ..Default::default()
/// });
///
/// assert_eq!(gate.call(()), Some("C"));
/// clock.set(50);
/// assert_eq!(gate.call(()), Some("A"));
/// clock.set(150);
/// assert_eq!(gate.call(()), Some("C"));
/// ```
pub struct RateComplianceGate<T, A = (), E = Infallible> {
    delay: CooldownMs,
    pipeline: Pipeline<T, A, E>,
    clock: Arc<dyn Clock>,
    next_eligible_ms: AtomicU64,
}

impl<T, A, E> RateComplianceGate<T, A, E> {
    /// Create a gate. It starts cold: the first call is always compliant.
    pub fn new(options: RateComplianceOptions<T, A, E>) -> Self {
        let (delay, pipeline, clock) = options.into_parts();

        Self {
            delay,
            pipeline,
            clock,
            next_eligible_ms: AtomicU64::new(UNARMED),
        }
    } // end constructor

    /// Configured cooldown.
    pub fn delay(&self) -> CooldownMs {
        self.delay
    }

    /// Classify a call made now, arming a new deadline if it is compliant.
    ///
    /// This is the first half of [`try_call`](Self::try_call) without running any
    /// stage. A compliant result counts as the window's compliant call.
    pub fn classify(&self) -> Compliance {
        classify_deadline(&self.next_eligible_ms, self.clock.now_ms(), self.delay)
    }

    /// Invoke the gate with `args`.
    ///
    /// Returns the value produced by the last configured stage, or `None` when no
    /// stage produced one. A stage error aborts the remaining stages and is
    /// returned unchanged; the deadline update for this call is kept.
    pub fn try_call(&self, args: A) -> Result<Option<T>, E>
    where
        T: Clone,
    {
        let compliance = self.classify();
        self.pipeline.run(compliance, &args)
    } // end method try_call

    /// Turn the gate into a plain closure.
    pub fn into_fn(self) -> impl Fn(A) -> Result<Option<T>, E>
    where
        T: Clone,
    {
        move |args| self.try_call(args)
    }

    pub(crate) fn next_eligible_ms(&self) -> Option<u64> {
        match self.next_eligible_ms.load(Ordering::Acquire) {
            UNARMED => None,
            deadline => Some(deadline),
        }
    }
}

impl<T: Clone, A> RateComplianceGate<T, A, Infallible> {
    /// Invoke a gate whose stages cannot fail.
    pub fn call(&self, args: A) -> Option<T> {
        match self.try_call(args) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<T, A, E> Default for RateComplianceGate<T, A, E> {
    /// A gate with no cooldown and no stages: every call returns `None`.
    fn default() -> Self {
        Self::new(RateComplianceOptions::default())
    }
}

impl<T, A, E> fmt::Debug for RateComplianceGate<T, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateComplianceGate")
            .field("delay", &self.delay)
            .field("next_eligible_ms", &self.next_eligible_ms())
            .finish_non_exhaustive()
    }
}
