//! Path feasibility checking. The runtime only ever asks one question of a
//! solver: can the current path constraints all hold at once?

use fxhash::FxHashMap as HashMap;

use crate::expr::{IVar, SymExpr};

/// Decision procedure over path constraints. Implementations range from a
/// full SMT backend to the replay-oriented [`Valuation`] below.
pub trait PathSolver {
    /// `true` when `constraints` are simultaneously satisfiable.
    fn check_pc(&mut self, constraints: &[SymExpr]) -> bool;
}

/// Replay backend: feasibility under one fixed assignment. A path is
/// feasible exactly when every constraint evaluates to true; constraints
/// that mention unassigned variables, or variables wider than the 64-bit
/// words the evaluator computes with, make the path infeasible.
#[derive(Debug, Clone, Default)]
pub struct Valuation {
    assignment: HashMap<IVar, u64>,
}

impl Valuation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, var: IVar, value: u64) -> &mut Self {
        self.assignment.insert(var, value);
        self
    }

    pub fn value_of(&self, var: &IVar) -> Option<u64> {
        self.assignment.get(var).copied()
    }
}

impl PathSolver for Valuation {
    fn check_pc(&mut self, constraints: &[SymExpr]) -> bool {
        let assignment = &self.assignment;
        constraints
            .iter()
            .all(|constraint| constraint.eval(&|var| assignment.get(var).copied()) == Some(1))
    }
}

/// Fixed-answer backend for exercising both sides of a fork.
#[derive(Debug, Clone)]
pub struct Decide(pub bool);

impl PathSolver for Decide {
    fn check_pc(&mut self, _constraints: &[SymExpr]) -> bool {
        self.0
    }
}
