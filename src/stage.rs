use std::{convert::Infallible, fmt, sync::Arc};

use crate::Compliance;

type StageFn<T, A, E> = dyn Fn(Option<T>, &A) -> Result<Option<T>, E> + Send + Sync;

/// One slot of the `before -> (compliant | anti_compliant) -> after` chain.
///
/// The chain threads a running value of type `Option<T>`, starting at `None`.
/// Each slot either leaves that value alone, replaces it with what a callable
/// returns, replaces it with a constant, or clears it back to `None`.
///
/// Callables receive the running value first and the call's arguments second.
/// Arguments are always the ones given to the gate, unchanged.
///
/// # Examples
///
/// ```
/// use rate_compliance::Stage;
///
/// let greet: Stage<String, (&str,)> = Stage::invoke(|_, (name,)| format!("hello {name}"));
/// let shout: Stage<String, (&str,)> =
///     Stage::invoke(|prev: Option<String>, _| prev.unwrap_or_default().to_uppercase());
///
/// let value = greet.apply(None, &("ada",)).unwrap();
/// let value = shout.apply(value, &("ada",)).unwrap();
///
/// assert_eq!(value.as_deref(), Some("HELLO ADA"));
/// ```
pub enum Stage<T, A = (), E = Infallible> {
    /// Not configured: the running value passes through unchanged.
    Absent,
    /// Called with `(previous, &args)`; its result becomes the running value.
    Invoke(Arc<StageFn<T, A, E>>),
    /// Replaces the running value without calling anything.
    Constant(T),
    /// Replaces the running value with `None` without calling anything.
    Clear,
}

impl<T: 'static, A: 'static, E: 'static> Stage<T, A, E> {
    /// Stage backed by a callable that always produces a value.
    pub fn invoke<F>(f: F) -> Self
    where
        F: Fn(Option<T>, &A) -> T + Send + Sync + 'static,
    {
        let f: Arc<StageFn<T, A, E>> =
            Arc::new(move |previous: Option<T>, args: &A| Ok(Some(f(previous, args))));
        Self::Invoke(f)
    }

    /// Stage backed by a callable that may produce "no value".
    pub fn invoke_optional<F>(f: F) -> Self
    where
        F: Fn(Option<T>, &A) -> Option<T> + Send + Sync + 'static,
    {
        let f: Arc<StageFn<T, A, E>> =
            Arc::new(move |previous: Option<T>, args: &A| Ok(f(previous, args)));
        Self::Invoke(f)
    }

    /// Stage backed by a fallible callable.
    ///
    /// An `Err` ends the pipeline for that call and is returned to the caller as is.
    pub fn try_invoke<F>(f: F) -> Self
    where
        F: Fn(Option<T>, &A) -> Result<T, E> + Send + Sync + 'static,
    {
        let f: Arc<StageFn<T, A, E>> =
            Arc::new(move |previous: Option<T>, args: &A| f(previous, args).map(Some));
        Self::Invoke(f)
    }
}

impl<T, A, E> Stage<T, A, E> {
    /// Stage that substitutes `value` for the running value.
    pub fn constant(value: T) -> Self {
        Self::Constant(value)
    }

    /// Whether the slot is configured at all.
    pub fn is_absent(&self) -> bool {
        matches!(self, Stage::Absent)
    }

    /// Run this stage on the running value.
    pub fn apply(&self, previous: Option<T>, args: &A) -> Result<Option<T>, E>
    where
        T: Clone,
    {
        match self {
            Stage::Absent => Ok(previous),
            Stage::Invoke(f) => f(previous, args),
            Stage::Constant(value) => Ok(Some(value.clone())),
            Stage::Clear => Ok(None),
        }
    }
}

impl<T, A, E> Default for Stage<T, A, E> {
    fn default() -> Self {
        Self::Absent
    }
}

impl<T: Clone, A, E> Clone for Stage<T, A, E> {
    fn clone(&self) -> Self {
        match self {
            Stage::Absent => Stage::Absent,
            Stage::Invoke(f) => Stage::Invoke(Arc::clone(f)),
            Stage::Constant(value) => Stage::Constant(value.clone()),
            Stage::Clear => Stage::Clear,
        }
    }
}

impl<T: fmt::Debug, A, E> fmt::Debug for Stage<T, A, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Absent => f.write_str("Absent"),
            Stage::Invoke(_) => f.write_str("Invoke(..)"),
            Stage::Constant(value) => f.debug_tuple("Constant").field(value).finish(),
            Stage::Clear => f.write_str("Clear"),
        }
    }
}

/// The four configured slots, shared by the plain and keyed gates.
pub(crate) struct Pipeline<T, A = (), E = Infallible> {
    before: Stage<T, A, E>,
    compliant: Stage<T, A, E>,
    anti_compliant: Stage<T, A, E>,
    after: Stage<T, A, E>,
}

impl<T, A, E> Pipeline<T, A, E> {
    pub(crate) fn new(
        before: Stage<T, A, E>,
        compliant: Stage<T, A, E>,
        anti_compliant: Stage<T, A, E>,
        after: Stage<T, A, E>,
    ) -> Self {
        Self {
            before,
            compliant,
            anti_compliant,
            after,
        }
    }

    /// Left-to-right reduction over `[before, compliant | anti_compliant, after]`,
    /// seeded with `None`.
    pub(crate) fn run(&self, compliance: Compliance, args: &A) -> Result<Option<T>, E>
    where
        T: Clone,
    {
        let middle = match compliance {
            Compliance::Compliant => &self.compliant,
            Compliance::AntiCompliant => &self.anti_compliant,
        };

        [&self.before, middle, &self.after]
            .into_iter()
            .try_fold(None, |previous, stage| stage.apply(previous, args))
    } // end method run
}
