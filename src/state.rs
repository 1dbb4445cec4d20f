//! Persistent program state.
//!
//! A state is an immutable snapshot of one execution path: a byte-granular
//! heap plus the path constraints collected on the way here. Every mutation
//! returns a fresh snapshot; the heap is paged and pages are shared between
//! snapshots until one of them writes.

use std::collections::BTreeMap;
use std::ops::{Index, IndexMut};
use std::sync::Arc;

use thiserror::Error;

use crate::expr::SymExpr;
use crate::value::{Location, Value};

#[derive(Debug, Error)]
pub enum Error {
    #[error("access at {addr:#x}+{width} is outside the allocated heap ({limit:#x})")]
    OutOfBounds { addr: u64, width: u64, limit: u64 },
    #[error("access at {addr:#x} expects {expected} bytes, found {found}: {value}")]
    WidthMismatch {
        addr: u64,
        expected: u64,
        found: u64,
        value: String,
    },
    #[error("path condition is not boolean: {0}")]
    NotBoolean(String),
    #[error("cannot store a zero-sized location at {addr:#x}")]
    ZeroSizeLocation { addr: u64 },
    #[error("growing the heap by {request} bytes overflows the limit {limit:#x}")]
    LimitOverflow { limit: u64, request: u64 },
}

const PAGE_SIZE: usize = 64;

#[derive(Debug, Clone)]
#[repr(transparent)]
struct Page {
    slots: Box<[Option<Value>; PAGE_SIZE]>,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            slots: Box::new(std::array::from_fn(|_| None)),
        }
    }
}

impl Index<usize> for Page {
    type Output = Option<Value>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.slots[index]
    }
}

impl IndexMut<usize> for Page {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.slots[index]
    }
}

impl Page {
    fn new() -> Self {
        Self::default()
    }
}

/// One execution path's snapshot: heap, path constraints, and the location
/// of the current frame's variadic save area.
#[derive(Debug, Clone, Default)]
pub struct State {
    pages: BTreeMap<u64, Arc<Page>>,
    limit: u64,
    constraints: Vec<SymExpr>,
    vararg: Location,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the variadic save area the current frame's `va_start`
    /// should hand out.
    pub fn with_vararg_area(mut self, area: Location) -> Self {
        self.vararg = area;
        self
    }

    pub fn vararg_loc(&self) -> Location {
        self.vararg
    }

    /// One past the highest allocated address.
    pub fn heap_size(&self) -> u64 {
        self.limit
    }

    /// Path constraints in the order they were added.
    pub fn pc(&self) -> &[SymExpr] {
        &self.constraints
    }

    fn locate(addr: u64) -> (u64, usize) {
        (addr / PAGE_SIZE as u64, (addr % PAGE_SIZE as u64) as usize)
    }

    fn check(&self, addr: u64, width: u64) -> Result<(), Error> {
        let in_bounds = addr
            .checked_add(width)
            .map_or(false, |end| end <= self.limit);
        if in_bounds {
            Ok(())
        } else {
            Err(Error::OutOfBounds {
                addr,
                width,
                limit: self.limit,
            })
        }
    }

    fn slot(&self, addr: u64) -> Option<&Value> {
        let (index, offset) = Self::locate(addr);
        self.pages.get(&index).and_then(|page| page[offset].as_ref())
    }

    fn set_slot(&mut self, addr: u64, value: Option<Value>) {
        let (index, offset) = Self::locate(addr);
        match self.pages.get_mut(&index) {
            Some(page) => {
                Arc::make_mut(page)[offset] = value;
            }
            None => {
                // never-written slots stay unmapped
                if value.is_some() {
                    let mut page = Page::new();
                    page[offset] = value;
                    self.pages.insert(index, Arc::new(page));
                }
            }
        }
    }

    /// Raw bounds-checked slot write. Batch operations clone the state once
    /// and then go through this.
    pub(crate) fn write_slot(&mut self, addr: u64, value: Option<Value>) -> Result<(), Error> {
        self.check(addr, 1)?;
        self.set_slot(addr, value);
        Ok(())
    }

    fn guard_stored_loc(value: &Value, addr: u64) -> Result<(), Error> {
        match value {
            Value::Loc(l) if l.size() == 0 => Err(Error::ZeroSizeLocation { addr }),
            _ => Ok(()),
        }
    }

    fn grow(&self, request: u64) -> Result<u64, Error> {
        self.limit.checked_add(request).ok_or(Error::LimitOverflow {
            limit: self.limit,
            request,
        })
    }

    /// Grows the heap by `size` uninitialized bytes.
    pub fn heap_alloc(&self, size: u64) -> Result<State, Error> {
        let limit = self.grow(size)?;
        let mut next = self.clone();
        next.limit = limit;
        Ok(next)
    }

    /// Appends `values` at the top of the heap, one slot each.
    pub fn heap_append(&self, values: &[Value]) -> Result<State, Error> {
        let limit = self.grow(values.len() as u64)?;
        let mut next = self.clone();
        let base = next.limit;
        next.limit = limit;
        for (i, value) in values.iter().enumerate() {
            if !matches!(value, Value::Uninit) {
                next.set_slot(base + i as u64, Some(value.clone()));
            }
        }
        Ok(next)
    }

    /// Writes one slot.
    pub fn update(&self, addr: u64, value: Value) -> Result<State, Error> {
        self.check(addr, 1)?;
        Self::guard_stored_loc(&value, addr)?;
        let mut next = self.clone();
        next.set_slot(addr, Some(value));
        Ok(next)
    }

    /// Writes a value spanning `width` slots: the value at the head, shadow
    /// markers over the tail. `width` must match the value's own span.
    pub fn update_sized(&self, addr: u64, value: Value, width: u64) -> Result<State, Error> {
        self.check(addr, width)?;
        Self::guard_stored_loc(&value, addr)?;
        let found = value.byte_width();
        if found != width {
            return Err(Error::WidthMismatch {
                addr,
                expected: width,
                found,
                value: value.to_string(),
            });
        }
        let mut next = self.clone();
        next.set_slot(addr, Some(value));
        for i in 1..width {
            next.set_slot(addr + i, Some(Value::Shadow));
        }
        Ok(next)
    }

    /// Returns `width` slots to the never-written status.
    pub fn clear(&self, addr: u64, width: u64) -> Result<State, Error> {
        self.check(addr, width)?;
        let mut next = self.clone();
        for i in 0..width {
            next.set_slot(addr + i, None);
        }
        Ok(next)
    }

    /// Raw slot read: `None` for in-bounds slots that were never written.
    pub fn heap_lookup(&self, addr: u64) -> Result<Option<&Value>, Error> {
        self.check(addr, 1)?;
        Ok(self.slot(addr))
    }

    /// Reads one slot, surfacing never-written slots as `Uninit`.
    pub fn at(&self, addr: u64) -> Result<Value, Error> {
        Ok(self.heap_lookup(addr)?.cloned().unwrap_or(Value::Uninit))
    }

    /// Reads a head slot that must span exactly `width` bytes.
    pub fn at_sized(&self, addr: u64, width: u64) -> Result<Value, Error> {
        self.check(addr, width)?;
        let value = self.at(addr)?;
        let found = value.byte_width();
        if found != width || matches!(value, Value::Shadow | Value::Uninit) {
            return Err(Error::WidthMismatch {
                addr,
                expected: width,
                found,
                value: value.to_string(),
            });
        }
        Ok(value)
    }

    /// Extends the path condition with a boolean constraint.
    pub fn add_pc(&self, constraint: SymExpr) -> Result<State, Error> {
        if !constraint.is_bool() {
            return Err(Error::NotBoolean(constraint.to_string()));
        }
        let mut next = self.clone();
        next.constraints.push(constraint);
        Ok(next)
    }
}
