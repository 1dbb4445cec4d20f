//! The runtime context handed to every primitive: feasibility solver,
//! fresh-variable source, failure branching policy, and hooks.

use either::Either;

use smallvec::{smallvec, SmallVec};

use thiserror::Error;

use crate::expr::{SymExpr, VarSource};
use crate::hooks::{ClonableRuntimeHook, HaltKind};
use crate::solver::PathSolver;
use crate::state::{Error as StateError, State};
use crate::value::{Location, Value};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    State(#[from] StateError),
    #[error("{op}: expected {expected}, found {found}")]
    TypeError {
        op: &'static str,
        expected: &'static str,
        found: String,
    },
    #[error("{op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },
    #[error("unsupported syscall {0}")]
    UnsupportedSyscall(i64),
}

/// Per-successor results are combined through this monoid: `Vec`
/// concatenates, `()` discards.
pub trait Outcome: Sized {
    fn join(self, other: Self) -> Self;
}

impl Outcome for () {
    fn join(self, _other: Self) -> Self {}
}

impl<T> Outcome for Vec<T> {
    fn join(mut self, mut other: Self) -> Self {
        self.append(&mut other);
        self
    }
}

/// Successors of a primitive in the collecting form, in production order.
pub type Outcomes = Vec<(State, Value)>;

/// Values a halting primitive hands to its halt continuation.
pub type HaltValues = SmallVec<[Value; 1]>;

pub(crate) fn halt_values() -> HaltValues {
    smallvec![Value::int_i64(-1, 32)]
}

/// Continuation the collecting forms plug in: every successor becomes one
/// `(state, value)` pair.
pub(crate) fn singleton(state: State, value: Value) -> Result<Outcomes, Error> {
    Ok(vec![(state, value)])
}

/// Halt continuation the collecting forms plug in: the retired state is
/// paired with each halt value.
pub(crate) fn halted(state: State, values: HaltValues) -> Result<Outcomes, Error> {
    Ok(values.into_iter().map(|value| (state.clone(), value)).collect())
}

/// Shared services every primitive draws on: `S` answers feasibility
/// queries, fresh symbolic variables come from the attached [`VarSource`],
/// and registered hooks observe forks, halts, and syscalls.
#[derive(Clone)]
pub struct Runtime<S> {
    pub(crate) solver: S,
    pub(crate) vars: VarSource,
    pub(crate) failure_branch: bool,
    pub(crate) hooks: Vec<Box<dyn ClonableRuntimeHook>>,
}

impl<S: PathSolver> Runtime<S> {
    pub fn new(solver: S) -> Self {
        Self {
            solver,
            vars: VarSource::new(),
            failure_branch: false,
            hooks: Vec::new(),
        }
    }

    /// Replaces the variable source, e.g. to partition id ranges across
    /// exploration workers.
    pub fn with_vars(mut self, vars: VarSource) -> Self {
        self.vars = vars;
        self
    }

    /// Enables the null-returning failure successor on allocations.
    pub fn failure_branching(mut self, enabled: bool) -> Self {
        self.failure_branch = enabled;
        self
    }

    pub fn add_hook(&mut self, hook: Box<dyn ClonableRuntimeHook>) {
        self.hooks.push(hook);
    }

    pub fn vars(&self) -> &VarSource {
        &self.vars
    }

    pub fn solver_mut(&mut self) -> &mut S {
        &mut self.solver
    }

    pub(crate) fn notify_fork(&mut self, regular: &State, failed: &State) {
        for hook in self.hooks.iter_mut() {
            hook.on_fork(regular, failed);
        }
    }

    pub(crate) fn notify_halt(&mut self, state: &State, kind: HaltKind) {
        for hook in self.hooks.iter_mut() {
            hook.on_path_halt(state, kind);
        }
    }

    pub(crate) fn notify_syscall(&mut self, number: i64, retval: i64) {
        for hook in self.hooks.iter_mut() {
            hook.on_syscall(number, retval);
        }
    }
}

pub(crate) fn arg<'a>(
    op: &'static str,
    args: &'a [Value],
    index: usize,
) -> Result<&'a Value, Error> {
    args.get(index).ok_or_else(|| Error::InvalidArgument {
        op,
        reason: format!("missing argument {}", index),
    })
}

pub(crate) fn int_arg(op: &'static str, args: &[Value], index: usize) -> Result<i64, Error> {
    let value = arg(op, args, index)?;
    value
        .as_int()
        .map(|s| s.as_i64())
        .ok_or_else(|| Error::TypeError {
            op,
            expected: "concrete integer",
            found: value.to_string(),
        })
}

pub(crate) fn loc_arg(op: &'static str, args: &[Value], index: usize) -> Result<Location, Error> {
    let value = arg(op, args, index)?;
    value.as_loc().ok_or_else(|| Error::TypeError {
        op,
        expected: "location",
        found: value.to_string(),
    })
}

pub(crate) fn non_negative(op: &'static str, args: &[Value], index: usize) -> Result<u64, Error> {
    let n = int_arg(op, args, index)?;
    if n < 0 {
        return Err(Error::InvalidArgument {
            op,
            reason: format!("negative count {}", n),
        });
    }
    Ok(n as u64)
}

pub(crate) fn positive(op: &'static str, args: &[Value], index: usize) -> Result<u64, Error> {
    let n = int_arg(op, args, index)?;
    if n <= 0 {
        return Err(Error::InvalidArgument {
            op,
            reason: format!("non-positive size {}", n),
        });
    }
    Ok(n as u64)
}

pub(crate) fn cond_arg(
    op: &'static str,
    args: &[Value],
    index: usize,
) -> Result<Either<bool, SymExpr>, Error> {
    let value = arg(op, args, index)?;
    value.as_cond().ok_or_else(|| Error::TypeError {
        op,
        expected: "boolean condition",
        found: value.to_string(),
    })
}
