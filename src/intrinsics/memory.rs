//! Block memory primitives. All three work on raw slots, so symbolic
//! bytes, pointers, and shadow markers move as-is.

use crate::runtime::{loc_arg, non_negative, singleton, Error, Outcome, Outcomes, Runtime};
use crate::solver::PathSolver;
use crate::state::State;
use crate::value::Value;

impl<S: PathSolver> Runtime<S> {
    /// `memcpy(dest, src, n)`: front-to-back slot copy. Overlap behaves
    /// like the naive loop; `memmove` is the safe variant.
    pub fn memcpy_with<T, K>(&mut self, state: &State, args: &[Value], mut k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let dest = loc_arg("memcpy", args, 0)?;
        let src = loc_arg("memcpy", args, 1)?;
        let n = non_negative("memcpy", args, 2)?;

        let mut next = state.clone();
        for i in 0..n {
            let value = next.heap_lookup(src.address() + i)?.cloned();
            next.write_slot(dest.address() + i, value)?;
        }
        k(next, Value::int(0, 32))
    }

    pub fn memcpy(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.memcpy_with(state, args, singleton)
    }

    /// `memmove(dest, src, n)`: stages all source slots before the first
    /// write, so overlapping regions copy correctly.
    pub fn memmove_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let dest = loc_arg("memmove", args, 0)?;
        let src = loc_arg("memmove", args, 1)?;
        let n = non_negative("memmove", args, 2)?;

        let mut staged = Vec::with_capacity(n as usize);
        for i in 0..n {
            staged.push(state.heap_lookup(src.address() + i)?.cloned());
        }

        let mut next = state.clone();
        for (i, value) in staged.into_iter().enumerate() {
            next.write_slot(dest.address() + i as u64, value)?;
        }
        k(next, Value::int(0, 32))
    }

    pub fn memmove(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.memmove_with(state, args, singleton)
    }

    /// `memset(dest, _, n)`: writes `n` zero bytes. The fill value is
    /// accepted but ignored.
    pub fn memset_with<T, K>(&mut self, state: &State, args: &[Value], mut k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let dest = loc_arg("memset", args, 0)?;
        let n = non_negative("memset", args, 2)?;

        let mut next = state.clone();
        for i in 0..n {
            next.write_slot(dest.address() + i, Some(Value::byte(0)))?;
        }
        k(next, Value::int(0, 32))
    }

    pub fn memset(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.memset_with(state, args, singleton)
    }
}
