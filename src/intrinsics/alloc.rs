//! Heap allocation primitives. All of them place fresh regions at the top
//! of the heap; nothing is ever reclaimed, so locations stay stable across
//! snapshots.

use crate::runtime::{loc_arg, non_negative, positive, singleton, Error, Outcome, Outcomes, Runtime};
use crate::solver::PathSolver;
use crate::state::State;
use crate::value::{Location, Region, Value};

impl<S: PathSolver> Runtime<S> {
    /// Hands `next` with its fresh location to `k`; with failure branching
    /// enabled, also the caller's own state with a null location. The
    /// regular successor always comes first.
    fn finish_alloc<T, K>(
        &mut self,
        original: &State,
        next: State,
        loc: Location,
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        if self.failure_branch {
            self.notify_fork(&next, original);
            let regular = k(next, Value::Loc(loc))?;
            let failed = k(original.clone(), Value::null_loc())?;
            Ok(regular.join(failed))
        } else {
            k(next, Value::Loc(loc))
        }
    }

    /// `malloc(size)`: uninitialized region of `size` bytes.
    pub fn malloc_with<T, K>(&mut self, state: &State, args: &[Value], k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let size = non_negative("malloc", args, 0)?;
        let loc = Location::new(state.heap_size(), size, Region::Heap);
        let next = state.heap_alloc(size)?;
        self.finish_alloc(state, next, loc, k)
    }

    pub fn malloc(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.malloc_with(state, args, singleton)
    }

    /// `calloc(nmemb, size)`: zero-filled region of `nmemb * size` bytes.
    pub fn calloc_with<T, K>(&mut self, state: &State, args: &[Value], k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let nmemb = positive("calloc", args, 0)?;
        let size = positive("calloc", args, 1)?;
        let total = nmemb.checked_mul(size).ok_or_else(|| Error::InvalidArgument {
            op: "calloc",
            reason: format!("{} * {} overflows", nmemb, size),
        })?;

        let zeros = vec![Value::byte(0); total as usize];
        let loc = Location::new(state.heap_size(), total, Region::Heap);
        let next = state.heap_append(&zeros)?;
        self.finish_alloc(state, next, loc, k)
    }

    pub fn calloc(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.calloc_with(state, args, singleton)
    }

    /// `memalign(alignment, size)`: pads the heap up to a multiple of
    /// `alignment`, then allocates. The failing successor, when enabled,
    /// keeps the caller's unpadded heap.
    pub fn memalign_with<T, K>(&mut self, state: &State, args: &[Value], k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let alignment = positive("memalign", args, 0)?;
        let size = non_negative("memalign", args, 1)?;

        let here = state.heap_size();
        let padded = here
            .checked_add(alignment - 1)
            .map(|top| (top / alignment) * alignment)
            .ok_or_else(|| Error::InvalidArgument {
                op: "memalign",
                reason: format!("aligning {} to {} overflows", here, alignment),
            })?;
        let filled = state.heap_alloc(padded - here)?;

        let loc = Location::new(filled.heap_size(), size, Region::Heap);
        let next = filled.heap_alloc(size)?;
        self.finish_alloc(state, next, loc, k)
    }

    pub fn memalign(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.memalign_with(state, args, singleton)
    }

    /// Shared tail of `realloc` and `reallocarray`: fresh region, raw slot
    /// copy over the surviving prefix. Never forks.
    fn regrow<T, K>(
        &mut self,
        state: &State,
        old: Location,
        size: u64,
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let dest = Location::new(state.heap_size(), size, Region::Heap);
        let mut next = state.heap_alloc(size)?;
        if !old.is_null() {
            let take = old.size().min(size);
            for i in 0..take {
                let value = next.heap_lookup(old.address() + i)?.cloned();
                next.write_slot(dest.address() + i, value)?;
            }
        }
        k(next, Value::Loc(dest))
    }

    /// `realloc(ptr, size)`: with a null `ptr` this degenerates to a plain
    /// allocation; otherwise the first `min(old, new)` bytes survive.
    pub fn realloc_with<T, K>(&mut self, state: &State, args: &[Value], k: K) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let old = loc_arg("realloc", args, 0)?;
        let size = non_negative("realloc", args, 1)?;
        self.regrow(state, old, size, k)
    }

    pub fn realloc(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.realloc_with(state, args, singleton)
    }

    /// `reallocarray(ptr, nmemb, size)`.
    pub fn reallocarray_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let old = loc_arg("reallocarray", args, 0)?;
        let nmemb = positive("reallocarray", args, 1)?;
        let size = positive("reallocarray", args, 2)?;
        let total = nmemb.checked_mul(size).ok_or_else(|| Error::InvalidArgument {
            op: "reallocarray",
            reason: format!("{} * {} overflows", nmemb, size),
        })?;
        self.regrow(state, old, total, k)
    }

    pub fn reallocarray(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.reallocarray_with(state, args, singleton)
    }
}
