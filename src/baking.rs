//! Currying adapter for pluggable measurement-processing steps.
//!
//! A [`Baked`] function holds a target function, a template of positional
//! arguments, a map of keyword arguments and a pass-through [`Span`]. The
//! slots covered by the span are placeholders; at call time they are
//! replaced by the runtime arguments:
//!
//! ```text
//! args     = [a0, a1, _, _, a4]      span = (2, 3)
//! runtime  = [r0, r1]
//! fun gets   [a0, a1, r0, r1, a4] + kwargs
//! ```
//!
//! The span is validated when the function is baked and the runtime arity is
//! validated on every call, so a malformed call is an error rather than a
//! silently truncated argument list.
//!
//! # Example
//!
//! ```
//! use laser_align::baking::Baked;
//! use std::collections::BTreeMap;
//!
//! let mut sub = Baked::new(
//!     |args: Vec<i64>, _kw: &BTreeMap<String, i64>| args[0] - args[1],
//!     vec![0, 10],
//!     BTreeMap::new(),
//!     0,
//! )
//! .unwrap();
//! assert_eq!(sub.call(vec![25]).unwrap(), 15);
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{ScanError, ScanResult};

/// Keyword arguments passed unchanged to every call.
pub type Kwargs<A> = BTreeMap<String, A>;

/// Inclusive range `(lo, hi)` of positional slots filled at call time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub lo: usize,
    pub hi: usize,
}

impl Span {
    /// Number of runtime arguments the span accepts.
    ///
    /// `None` when `lo > hi` or when the slot after `hi` is not addressable.
    pub fn width(&self) -> Option<usize> {
        if self.lo > self.hi {
            return None;
        }
        self.hi.checked_add(1).map(|end| end - self.lo)
    }
}

impl From<usize> for Span {
    fn from(slot: usize) -> Self {
        Span { lo: slot, hi: slot }
    }
}

impl From<(usize, usize)> for Span {
    fn from((lo, hi): (usize, usize)) -> Self {
        Span { lo, hi }
    }
}

type BakedFn<A, R> = Box<dyn FnMut(Vec<A>, &Kwargs<A>) -> R>;

/// A function with some of its arguments baked in.
pub struct Baked<A, R> {
    fun: BakedFn<A, R>,
    args: Vec<A>,
    kwargs: Kwargs<A>,
    span: Span,
    arity: usize,
}

impl<A: Clone, R> Baked<A, R> {
    /// Bakes `fun` with `args` and `kwargs`, leaving the slots in `span` open.
    ///
    /// Fails with [`ScanError::InvalidSpan`] when `lo > hi`, when `hi` is
    /// `usize::MAX` or when `lo` lies beyond the end of `args`. Slots past
    /// the end are allowed: `args` need not carry placeholders for trailing
    /// holes.
    pub fn new<F>(
        fun: F,
        args: Vec<A>,
        kwargs: Kwargs<A>,
        span: impl Into<Span>,
    ) -> ScanResult<Self>
    where
        F: FnMut(Vec<A>, &Kwargs<A>) -> R + 'static,
    {
        let span = span.into();
        let arity = match span.width() {
            Some(width) if span.lo <= args.len() => width,
            _ => {
                return Err(ScanError::InvalidSpan {
                    lo: span.lo,
                    hi: span.hi,
                    len: args.len(),
                })
            }
        };
        Ok(Self {
            fun: Box::new(fun),
            args,
            kwargs,
            span,
            arity,
        })
    }

    /// Number of runtime arguments expected by [`Baked::call`].
    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn span(&self) -> Span {
        self.span
    }

    /// Builds the full positional argument list for `runtime`.
    fn splice(&self, runtime: Vec<A>) -> ScanResult<Vec<A>> {
        if runtime.len() != self.arity {
            return Err(ScanError::ArgumentCount {
                expected: self.arity,
                got: runtime.len(),
            });
        }
        // lo + arity == hi + 1, checked at construction
        let tail_start = (self.span.lo + self.arity).min(self.args.len());
        let capacity = self.span.lo + runtime.len() + self.args.len() - tail_start;
        let mut full = Vec::with_capacity(capacity);
        full.extend_from_slice(&self.args[..self.span.lo]);
        full.extend(runtime);
        full.extend_from_slice(&self.args[tail_start..]);
        Ok(full)
    }

    /// Calls the baked function with `runtime` spliced into the open slots.
    pub fn call(&mut self, runtime: Vec<A>) -> ScanResult<R> {
        let full = self.splice(runtime)?;
        Ok((self.fun)(full, &self.kwargs))
    }
}

impl<A: fmt::Debug, R> fmt::Debug for Baked<A, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Baked")
            .field("args", &self.args)
            .field("kwargs", &self.kwargs)
            .field("span", &self.span)
            .finish_non_exhaustive()
    }
}

/// Bakes `fun` with positional arguments only.
pub fn baker<A, R, F>(fun: F, args: Vec<A>, span: impl Into<Span>) -> ScanResult<Baked<A, R>>
where
    A: Clone,
    F: FnMut(Vec<A>, &Kwargs<A>) -> R + 'static,
{
    Baked::new(fun, args, Kwargs::new(), span)
}
