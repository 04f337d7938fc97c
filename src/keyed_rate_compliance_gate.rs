use std::{
    convert::Infallible,
    fmt,
    sync::{
        Arc, Weak,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::Duration,
};

use dashmap::DashMap;

use crate::{
    Clock, Compliance, CooldownMs, RateComplianceOptions,
    common::{UNARMED, classify_deadline},
    stage::Pipeline,
};

/// A [`RateComplianceGate`](crate::RateComplianceGate) per key, sharing one set of
/// stages.
///
/// Each key keeps its own deadline, so `"user_1"` being in cooldown says nothing
/// about `"user_2"`. Keys are created on first use.
///
/// # Memory growth
///
/// Keys are never removed on their own. Call [`cleanup`](Self::cleanup) or start
/// [`run_cleanup_loop`](Self::run_cleanup_loop) when the key space is unbounded.
/// Removing a key whose deadline has passed does not change any later
/// classification: the next call for it is compliant either way.
///
/// # Examples
///
/// ```
/// use rate_compliance::{
///     Compliance, CooldownMs, KeyedRateComplianceGate, ManualClock, RateComplianceOptions,
/// };
/// use std::sync::Arc;
///
/// let clock = ManualClock::new(0);
/// let gate: KeyedRateComplianceGate<()> = KeyedRateComplianceGate::new(RateComplianceOptions {
///     delay: CooldownMs::from(1_000),
///     clock: Arc::new(clock.clone()),
///     ..Default::default()
/// });
///
/// assert_eq!(gate.classify("user_1"), Compliance::Compliant);
/// assert_eq!(gate.classify("user_1"), Compliance::AntiCompliant);
/// assert_eq!(gate.classify("user_2"), Compliance::Compliant);
/// ```
pub struct KeyedRateComplianceGate<T, A = (), E = Infallible> {
    delay: CooldownMs,
    pipeline: Pipeline<T, A, E>,
    clock: Arc<dyn Clock>,
    deadlines: DashMap<String, AtomicU64>,
}

impl<T, A, E> KeyedRateComplianceGate<T, A, E> {
    /// Create a keyed gate with no tracked keys.
    pub fn new(options: RateComplianceOptions<T, A, E>) -> Self {
        let (delay, pipeline, clock) = options.into_parts();

        Self {
            delay,
            pipeline,
            clock,
            deadlines: DashMap::new(),
        }
    } // end constructor

    /// Configured cooldown, shared by all keys.
    pub fn delay(&self) -> CooldownMs {
        self.delay
    }

    /// Classify a call for `key` made now, arming its deadline if compliant.
    pub fn classify(&self, key: &str) -> Compliance {
        let now_ms = self.clock.now_ms();

        if let Some(deadline) = self.deadlines.get(key) {
            return classify_deadline(&deadline, now_ms, self.delay);
        }

        let deadline = self
            .deadlines
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(UNARMED));

        classify_deadline(&deadline, now_ms, self.delay)
    } // end method classify

    /// Invoke the gate for `key` with `args`.
    ///
    /// Same contract as [`RateComplianceGate::try_call`](crate::RateComplianceGate::try_call),
    /// with the deadline looked up per key. No map lock is held while stages run.
    pub fn try_call(&self, key: &str, args: A) -> Result<Option<T>, E>
    where
        T: Clone,
    {
        let compliance = self.classify(key);
        self.pipeline.run(compliance, &args)
    } // end method try_call

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Drop keys whose deadline passed more than `stale_after_ms` ago.
    pub fn cleanup(&self, stale_after_ms: u64) {
        let now_ms = self.clock.now_ms();
        let before = self.deadlines.len();

        self.deadlines
            .retain(|_, deadline| match deadline.load(Ordering::Acquire) {
                UNARMED => false,
                deadline => now_ms.saturating_sub(deadline) <= stale_after_ms,
            });

        tracing::debug!(
            removed = before.saturating_sub(self.deadlines.len()),
            remaining = self.deadlines.len(),
            stale_after_ms,
            "rate_compliance.cleanup"
        );
    } // end method cleanup

    #[cfg(test)]
    pub(crate) fn next_eligible_ms(&self, key: &str) -> Option<u64> {
        self.deadlines
            .get(key)
            .map(|deadline| deadline.load(Ordering::Acquire))
            .filter(|deadline| *deadline != UNARMED)
    }
}

impl<T, A, E> KeyedRateComplianceGate<T, A, E>
where
    T: Send + Sync + 'static,
    A: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Spawn a background thread calling [`cleanup`](Self::cleanup) every
    /// `interval_ms`.
    ///
    /// The thread only holds a weak reference and exits once the gate is dropped.
    pub fn run_cleanup_loop(self: &Arc<Self>, stale_after_ms: u64, interval_ms: u64) {
        let gate = Arc::downgrade(self);
        let interval = Duration::from_millis(interval_ms.max(1));

        thread::spawn(move || cleanup_loop(gate, stale_after_ms, interval));
    }
}

fn cleanup_loop<T, A, E>(
    gate: Weak<KeyedRateComplianceGate<T, A, E>>,
    stale_after_ms: u64,
    interval: Duration,
) {
    loop {
        thread::sleep(interval);

        let Some(gate) = gate.upgrade() else {
            tracing::debug!("rate_compliance.cleanup_loop.stopped");
            return;
        };

        gate.cleanup(stale_after_ms);
    }
}

impl<T, A> KeyedRateComplianceGate<T, A, Infallible>
where
    T: Clone,
{
    /// Invoke the gate for `key` when its stages cannot fail.
    pub fn call(&self, key: &str, args: A) -> Option<T> {
        match self.try_call(key, args) {
            Ok(value) => value,
            Err(never) => match never {},
        }
    }
}

impl<T, A, E> fmt::Debug for KeyedRateComplianceGate<T, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedRateComplianceGate")
            .field("delay", &self.delay)
            .field("keys", &self.deadlines.len())
            .finish_non_exhaustive()
    }
}
