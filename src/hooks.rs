use dyn_clone::{clone_trait_object, DynClone};

use crate::state::State;

/// Why a path stopped producing successors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HaltKind {
    /// An assertion admitted a violating assignment.
    AssertViolation,
    /// An assumption made the path condition unsatisfiable.
    AssumeUnsat,
}

/// Observation points the runtime reports while primitives run. All
/// methods default to no-ops; implement the ones of interest.
pub trait RuntimeHook {
    /// An allocation produced both a regular and a failing successor.
    fn on_fork(&mut self, _regular: &State, _failed: &State) {}

    /// A path halted; `state` carries the constraints a test generator
    /// would sample to reproduce it.
    fn on_path_halt(&mut self, _state: &State, _kind: HaltKind) {}

    /// A bridged syscall completed with `retval`.
    fn on_syscall(&mut self, _number: i64, _retval: i64) {}
}

pub trait ClonableRuntimeHook: DynClone + RuntimeHook {}
clone_trait_object!(ClonableRuntimeHook);
