//! `va_list` descriptor management, System V AMD64 layout. A descriptor
//! is the four-field struct `{gp_offset: i32, fp_offset: i32,
//! overflow_arg_area: ptr, reg_save_area: ptr}` occupying 4/4/8/8 bytes.
//! The variadic arguments themselves live in the vararg area installed on
//! the state at construction time.

use crate::runtime::{loc_arg, singleton, Error, Outcome, Outcomes, Runtime};
use crate::solver::PathSolver;
use crate::state::State;
use crate::value::Value;

/// Bytes one `va_list` descriptor occupies in memory.
pub const DESCRIPTOR_BYTES: u64 = 24;

/// Displacement of the overflow (stack spill) area within the vararg
/// region.
pub const OVERFLOW_AREA_OFFSET: u64 = 48;

impl<S: PathSolver> Runtime<S> {
    /// `va_start(list)`: installs a fresh descriptor at `list`, register
    /// offsets zeroed and both area pointers aimed into the vararg
    /// region.
    pub fn va_start_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let list = loc_arg("va_start", args, 0)?;
        let area = state.vararg_loc();
        let base = list.address();

        let next = state
            .update_sized(base, Value::int(0, 32), 4)?
            .update_sized(base + 4, Value::int(0, 32), 4)?
            .update_sized(base + 8, Value::Loc(area + OVERFLOW_AREA_OFFSET), 8)?
            .update_sized(base + 16, Value::Loc(area), 8)?;
        k(next, Value::int(0, 32))
    }

    pub fn va_start(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.va_start_with(state, args, singleton)
    }

    /// `va_end(list)`: returns the descriptor's slots to the never-written
    /// status.
    pub fn va_end_with<T, K>(&mut self, state: &State, args: &[Value], mut k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let list = loc_arg("va_end", args, 0)?;
        let next = state.clear(list.address(), DESCRIPTOR_BYTES)?;
        k(next, Value::int(0, 32))
    }

    pub fn va_end(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.va_end_with(state, args, singleton)
    }

    /// `va_copy(dst, src)`: duplicates an initialized descriptor field by
    /// field.
    pub fn va_copy_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let dst = loc_arg("va_copy", args, 0)?;
        let src = loc_arg("va_copy", args, 1)?;

        let reg_save = state.at(src.address() + 16)?;
        if !matches!(reg_save, Value::Loc(_)) {
            return Err(Error::TypeError {
                op: "va_copy",
                expected: "initialized descriptor (location)",
                found: reg_save.to_string(),
            });
        }

        let gp_offset = state.at_sized(src.address(), 4)?;
        let fp_offset = state.at_sized(src.address() + 4, 4)?;
        let overflow = state.at_sized(src.address() + 8, 8)?;
        let next = state
            .update_sized(dst.address(), gp_offset, 4)?
            .update_sized(dst.address() + 4, fp_offset, 4)?
            .update_sized(dst.address() + 8, overflow, 8)?
            .update_sized(dst.address() + 16, reg_save, 8)?;
        k(next, Value::int(0, 32))
    }

    pub fn va_copy(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.va_copy_with(state, args, singleton)
    }
}
