//! Symbol introduction and path pruning. `assert` and `assume` are the
//! only primitives that can halt a path instead of continuing it; halted
//! paths go to the halt continuation with the retired state, whose
//! constraints a test generator can sample.

use either::Either;

use log::warn;

use crate::expr::SymExpr;
use crate::hooks::HaltKind;
use crate::runtime::{
    cond_arg, halt_values, halted, loc_arg, non_negative, singleton, Error, HaltValues, Outcome,
    Outcomes, Runtime,
};
use crate::solver::PathSolver;
use crate::state::State;
use crate::value::Value;

impl<S: PathSolver> Runtime<S> {
    /// `make_symbolic(loc, len)`: one fresh 8-bit variable per byte, each
    /// independent of the others.
    pub fn make_symbolic_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let loc = loc_arg("make_symbolic", args, 0)?;
        let len = non_negative("make_symbolic", args, 1)?;

        let mut next = state.clone();
        for i in 0..len {
            let var = self.vars.fresh(8);
            next.write_slot(loc.address() + i, Some(Value::Sym(SymExpr::ivar(var))))?;
        }
        k(next, Value::int(0, 32))
    }

    pub fn make_symbolic(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.make_symbolic_with(state, args, singleton)
    }

    /// `make_symbolic_whole(loc, size)`: one fresh variable of width
    /// `size * 8` spanning the whole region, shadow markers over the tail.
    pub fn make_symbolic_whole_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let loc = loc_arg("make_symbolic_whole", args, 0)?;
        let size = non_negative("make_symbolic_whole", args, 1)?;
        if size == 0 || size > u32::MAX as u64 / 8 {
            return Err(Error::InvalidArgument {
                op: "make_symbolic_whole",
                reason: format!("word size {} has no representable bit width", size),
            });
        }

        let var = self.vars.fresh(size as u32 * 8);
        let next = state.update_sized(loc.address(), Value::Sym(SymExpr::ivar(var)), size)?;
        k(next, Value::int(0, 32))
    }

    pub fn make_symbolic_whole(
        &mut self,
        state: &State,
        args: &[Value],
    ) -> Result<Outcomes, Error> {
        self.make_symbolic_whole_with(state, args, singleton)
    }

    /// `assert(cond)`: halts the path when a violating assignment is
    /// feasible, otherwise continues with `cond` added to the path
    /// condition.
    pub fn assert_with<T, K, H>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
        h: H,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
        H: FnOnce(State, HaltValues) -> Result<T, Error>,
    {
        match cond_arg("assert", args, 0)? {
            Either::Left(true) => k(state.clone(), Value::int(1, 32)),
            Either::Left(false) => {
                warn!("assertion violated on a concrete condition");
                self.notify_halt(state, HaltKind::AssertViolation);
                h(state.clone(), halt_values())
            }
            Either::Right(cond) => {
                let violating = state.add_pc(!cond.clone())?;
                if self.solver.check_pc(violating.pc()) {
                    warn!("assertion {} admits a violation", cond);
                    self.notify_halt(&violating, HaltKind::AssertViolation);
                    h(violating, halt_values())
                } else {
                    k(state.add_pc(cond)?, Value::int(1, 32))
                }
            }
        }
    }

    pub fn assert(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.assert_with(state, args, singleton, halted)
    }

    /// `assume(cond)`: halts the path when `cond` cannot hold, otherwise
    /// continues under it.
    pub fn assume_with<T, K, H>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
        h: H,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
        H: FnOnce(State, HaltValues) -> Result<T, Error>,
    {
        match cond_arg("assume", args, 0)? {
            Either::Left(true) => k(state.clone(), Value::int(1, 32)),
            Either::Left(false) => {
                warn!("assumption is concretely false");
                self.notify_halt(state, HaltKind::AssumeUnsat);
                h(state.clone(), halt_values())
            }
            Either::Right(cond) => {
                let next = state.add_pc(cond)?;
                if !self.solver.check_pc(next.pc()) {
                    warn!("assumption makes the path infeasible");
                    self.notify_halt(&next, HaltKind::AssumeUnsat);
                    h(next, halt_values())
                } else {
                    k(next, Value::int(1, 32))
                }
            }
        }
    }

    pub fn assume(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.assume_with(state, args, singleton, halted)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::expr::{Expr, VarSource};
    use crate::hooks::ClonableRuntimeHook;
    use crate::hooks::RuntimeHook;
    use crate::solver::{Decide, Valuation};
    use crate::value::{Location, Region, Scalar};

    fn runtime(answer: bool) -> Runtime<Decide> {
        Runtime::new(Decide(answer))
    }

    fn region(state: &State) -> Location {
        Location::new(0, state.heap_size(), Region::Heap)
    }

    #[test]
    fn make_symbolic_introduces_independent_bytes() {
        let mut rt = runtime(true);
        let state = State::new().heap_alloc(4).unwrap();
        let loc = region(&state);

        let outcomes = rt
            .make_symbolic(&state, &[Value::Loc(loc), Value::int(4, 64)])
            .unwrap();
        let (next, value) = &outcomes[0];
        assert_eq!(*value, Value::int(0, 32));

        let mut ids = Vec::new();
        for addr in 0..4 {
            let sym = next.at(addr).unwrap();
            let expr = sym.as_sym().cloned().unwrap();
            assert_eq!(expr.bits(), 8);
            match &*expr {
                Expr::IVar(var) => ids.push(var.id()),
                other => panic!("expected a variable, got {}", other),
            }
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 4);

        // the caller's snapshot still reads as uninitialized
        assert_eq!(state.at(0).unwrap(), Value::Uninit);
    }

    #[test]
    fn make_symbolic_whole_is_one_word() {
        let mut rt = runtime(true);
        let state = State::new().heap_alloc(4).unwrap();
        let loc = region(&state);

        let outcomes = rt
            .make_symbolic_whole(&state, &[Value::Loc(loc), Value::int(4, 64)])
            .unwrap();
        let (next, _) = &outcomes[0];

        let head = next.at_sized(0, 4).unwrap();
        assert_eq!(head.as_sym().map(|e| e.bits()), Some(32));
        for addr in 1..4 {
            assert_eq!(next.at(addr).unwrap(), Value::Shadow);
        }
    }

    #[test]
    fn make_symbolic_whole_spans_past_the_scalar_limit() {
        let mut rt = runtime(true);
        let state = State::new().heap_alloc(16).unwrap();
        let loc = region(&state);

        let outcomes = rt
            .make_symbolic_whole(&state, &[Value::Loc(loc), Value::int(16, 64)])
            .unwrap();
        let (next, value) = &outcomes[0];
        assert_eq!(*value, Value::int(0, 32));

        let head = next.at_sized(0, 16).unwrap();
        assert_eq!(head.as_sym().map(|e| e.bits()), Some(128));
        for addr in 1..16 {
            assert_eq!(next.at(addr).unwrap(), Value::Shadow);
        }
    }

    #[test]
    fn make_symbolic_whole_guards_the_word_size() {
        let mut rt = runtime(true);
        let state = State::new().heap_alloc(16).unwrap();
        let loc = region(&state);

        assert!(matches!(
            rt.make_symbolic_whole(&state, &[Value::Loc(loc), Value::int(0, 64)]),
            Err(Error::InvalidArgument { .. })
        ));
        // a word too wide for any symbol's bit count
        assert!(matches!(
            rt.make_symbolic_whole(&state, &[Value::Loc(loc), Value::int(1 << 30, 64)]),
            Err(Error::InvalidArgument { .. })
        ));
        assert!(matches!(
            rt.make_symbolic_whole(&state, &[Value::int(0, 64), Value::int(4, 64)]),
            Err(Error::TypeError { .. })
        ));
    }

    #[test]
    fn assert_on_concrete_conditions() {
        let mut rt = runtime(true);
        let state = State::new();

        let passing = rt.assert(&state, &[Value::int(3, 32)]).unwrap();
        assert_eq!(passing.len(), 1);
        assert_eq!(passing[0].1, Value::int(1, 32));
        assert!(passing[0].0.pc().is_empty());

        let halted = rt.assert(&state, &[Value::int(0, 32)]).unwrap();
        assert_eq!(halted.len(), 1);
        assert_eq!(halted[0].1, Value::int_i64(-1, 32));
        assert!(halted[0].0.pc().is_empty());
    }

    #[test]
    fn assert_halts_when_violation_is_feasible() {
        let vars = VarSource::new();
        let cond = SymExpr::ivar(vars.fresh(1));
        let state = State::new();

        // solver says the negated condition is satisfiable
        let mut rt = runtime(true);
        let outcomes = rt.assert(&state, &[Value::Sym(cond.clone())]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, Value::int_i64(-1, 32));
        assert_eq!(outcomes[0].0.pc(), &[!cond.clone()]);

        // solver says it is not: the path continues under the condition
        let mut rt = runtime(false);
        let outcomes = rt.assert(&state, &[Value::Sym(cond.clone())]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, Value::int(1, 32));
        assert_eq!(outcomes[0].0.pc(), &[cond]);
    }

    #[test]
    fn assume_extends_or_retires_the_path() {
        let vars = VarSource::new();
        let cond = SymExpr::ivar(vars.fresh(1));
        let state = State::new();

        let mut rt = runtime(true);
        let outcomes = rt.assume(&state, &[Value::Sym(cond.clone())]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, Value::int(1, 32));
        assert_eq!(outcomes[0].0.pc(), &[cond.clone()]);

        // infeasible: the halted state still carries the assumption
        let mut rt = runtime(false);
        let outcomes = rt.assume(&state, &[Value::Sym(cond.clone())]).unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, Value::int_i64(-1, 32));
        assert_eq!(outcomes[0].0.pc(), &[cond]);

        let halted = rt.assume(&state, &[Value::int(0, 32)]).unwrap();
        assert_eq!(halted[0].1, Value::int_i64(-1, 32));
    }

    #[test]
    fn assert_and_assume_agree_under_a_valuation() {
        let vars = VarSource::new();
        let x = vars.fresh(8);
        let is_five = SymExpr::ivar(x.clone()).eq(SymExpr::val(Scalar::new(5, 8)));
        let is_nine = SymExpr::ivar(x.clone()).eq(SymExpr::val(Scalar::new(9, 8)));

        let mut solver = Valuation::new();
        solver.assign(x, 5);
        let mut rt = Runtime::new(solver);
        let state = State::new();

        // x == 5 holds under the valuation: assert passes, assume passes
        let outcomes = rt.assert(&state, &[Value::Sym(is_five.clone())]).unwrap();
        assert_eq!(outcomes[0].1, Value::int(1, 32));
        let outcomes = rt.assume(&state, &[Value::Sym(is_five)]).unwrap();
        assert_eq!(outcomes[0].1, Value::int(1, 32));

        // x == 9 does not: assert halts, assume halts
        let outcomes = rt.assert(&state, &[Value::Sym(is_nine.clone())]).unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(-1, 32));
        let outcomes = rt.assume(&state, &[Value::Sym(is_nine)]).unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(-1, 32));
    }

    #[test]
    fn non_conditions_are_type_errors() {
        let vars = VarSource::new();
        let mut rt = runtime(true);
        let state = State::new();

        assert!(matches!(
            rt.assert(&state, &[Value::null_loc()]),
            Err(Error::TypeError { .. })
        ));
        let wide = Value::Sym(SymExpr::ivar(vars.fresh(8)));
        assert!(matches!(
            rt.assume(&state, &[wide]),
            Err(Error::TypeError { .. })
        ));
    }

    #[derive(Clone)]
    struct HaltProbe(Arc<Mutex<Vec<HaltKind>>>);

    impl RuntimeHook for HaltProbe {
        fn on_path_halt(&mut self, _state: &State, kind: HaltKind) {
            self.0.lock().push(kind);
        }
    }

    impl ClonableRuntimeHook for HaltProbe {}

    #[test]
    fn halts_are_reported_to_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut rt = runtime(true);
        rt.add_hook(Box::new(HaltProbe(Arc::clone(&seen))));

        let state = State::new();
        rt.assert(&state, &[Value::int(0, 32)]).unwrap();
        rt.assume(&state, &[Value::int(0, 32)]).unwrap();

        assert_eq!(
            seen.lock().as_slice(),
            &[HaltKind::AssertViolation, HaltKind::AssumeUnsat]
        );
    }

    #[test]
    fn continuation_form_matches_collecting_form() {
        let vars = VarSource::new();
        let cond = SymExpr::ivar(vars.fresh(1));
        let state = State::new();
        let args = [Value::Sym(cond)];

        let collected = runtime(true).assert(&state, &args).unwrap();

        let driven = std::cell::RefCell::new(Vec::new());
        runtime(true)
            .assert_with(
                &state,
                &args,
                |s, v| {
                    driven.borrow_mut().push((s, v));
                    Ok(())
                },
                |s, vs| {
                    for v in vs {
                        driven.borrow_mut().push((s.clone(), v));
                    }
                    Ok(())
                },
            )
            .unwrap();
        let driven = driven.into_inner();

        assert_eq!(collected.len(), driven.len());
        for ((cs, cv), (ds, dv)) in collected.iter().zip(driven.iter()) {
            assert_eq!(cv, dv);
            assert_eq!(cs.pc(), ds.pc());
        }
    }
}
