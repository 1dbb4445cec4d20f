//! Runtime values: concrete machine integers, symbolic expressions, heap
//! locations, and the placeholder variants used by the byte-granular heap.

use std::fmt;
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Neg, Not, Sub};

use either::Either;

use smallvec::SmallVec;

use crate::expr::SymExpr;

/// Byte width of stored pointers.
pub const POINTER_BYTES: u64 = 8;

/// A concrete two's-complement payload with an explicit bit-width. Bits
/// beyond `width` are kept zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Scalar {
    bits: u64,
    width: u32,
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{}", self.bits, self.width)
    }
}

impl Scalar {
    pub fn new(bits: u64, width: u32) -> Self {
        debug_assert!(width >= 1 && width <= 64);
        Self {
            bits: bits & Self::mask(width),
            width,
        }
    }

    pub fn from_i64(value: i64, width: u32) -> Self {
        Self::new(value as u64, width)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(value as u64, 1)
    }

    fn mask(width: u32) -> u64 {
        if width >= 64 {
            u64::MAX
        } else {
            (1u64 << width) - 1
        }
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn is_zero(&self) -> bool {
        self.bits == 0
    }

    pub fn is_one(&self) -> bool {
        self.bits == 1
    }

    pub fn is_ones(&self) -> bool {
        self.bits == Self::mask(self.width)
    }

    pub fn as_u64(&self) -> u64 {
        self.bits
    }

    /// Sign-extended reading of the payload.
    pub fn as_i64(&self) -> i64 {
        if self.width >= 64 {
            self.bits as i64
        } else {
            let sign = 1u64 << (self.width - 1);
            if self.bits & sign != 0 {
                (self.bits | !Self::mask(self.width)) as i64
            } else {
                self.bits as i64
            }
        }
    }

    pub fn byte_width(&self) -> u64 {
        (u64::from(self.width) + 7) / 8
    }

    /// Little-endian byte decomposition over `byte_width` bytes.
    pub fn to_le_bytes(&self) -> SmallVec<[u8; 8]> {
        self.bits
            .to_le_bytes()
            .iter()
            .copied()
            .take(self.byte_width() as usize)
            .collect()
    }
}

macro_rules! impl_scalar_binop {
    ($trait:ident, $name:ident, $wrapping:ident) => {
        impl $trait for Scalar {
            type Output = Scalar;

            fn $name(self, rhs: Scalar) -> Self::Output {
                debug_assert_eq!(self.width, rhs.width);
                Scalar::new(self.bits.$wrapping(rhs.bits), self.width)
            }
        }
    };
}

impl_scalar_binop!(Add, add, wrapping_add);
impl_scalar_binop!(Sub, sub, wrapping_sub);
impl_scalar_binop!(Mul, mul, wrapping_mul);

macro_rules! impl_scalar_bitop {
    ($trait:ident, $name:ident, $op:tt) => {
        impl $trait for Scalar {
            type Output = Scalar;

            fn $name(self, rhs: Scalar) -> Self::Output {
                debug_assert_eq!(self.width, rhs.width);
                Scalar::new(self.bits $op rhs.bits, self.width)
            }
        }
    };
}

impl_scalar_bitop!(BitAnd, bitand, &);
impl_scalar_bitop!(BitOr, bitor, |);
impl_scalar_bitop!(BitXor, bitxor, ^);

impl Not for Scalar {
    type Output = Scalar;

    fn not(self) -> Self::Output {
        Scalar::new(!self.bits, self.width)
    }
}

impl Neg for Scalar {
    type Output = Scalar;

    fn neg(self) -> Self::Output {
        Scalar::new(self.bits.wrapping_neg(), self.width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    Heap,
    Stack,
    Global,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::Heap => write!(f, "heap"),
            Region::Stack => write!(f, "stack"),
            Region::Global => write!(f, "global"),
        }
    }
}

/// A pointer into one allocation: `base` is where the allocation starts,
/// `offset` the displacement of this pointer within it, and `size` the
/// allocation's total byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Location {
    base: u64,
    offset: u64,
    size: u64,
    region: Region,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "&{}[{:#x}+{}]:{}",
            self.region, self.base, self.offset, self.size
        )
    }
}

impl Location {
    pub fn new(base: u64, size: u64, region: Region) -> Self {
        Self {
            base,
            offset: 0,
            size,
            region,
        }
    }

    pub const fn null() -> Self {
        Self {
            base: 0,
            offset: 0,
            size: 0,
            region: Region::Heap,
        }
    }

    pub fn is_null(&self) -> bool {
        self.base == 0 && self.offset == 0 && self.size == 0
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn region(&self) -> Region {
        self.region
    }

    /// Absolute heap address this pointer refers to.
    pub fn address(&self) -> u64 {
        self.base + self.offset
    }

    /// Bytes left between this pointer and the end of its allocation.
    pub fn remaining(&self) -> u64 {
        self.size.saturating_sub(self.offset)
    }
}

impl Default for Location {
    fn default() -> Self {
        Self::null()
    }
}

impl Add<u64> for Location {
    type Output = Location;

    fn add(self, rhs: u64) -> Self::Output {
        Self {
            offset: self.offset + rhs,
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Concrete machine integer.
    Int(Scalar),
    /// Symbolic expression; spans `byte_width` slots from its head slot.
    Sym(SymExpr),
    /// Pointer into an allocation.
    Loc(Location),
    /// Allocated but never written.
    Uninit,
    /// Trailing byte of a multi-byte value; the head slot holds the value
    /// itself.
    Shadow,
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(s) => write!(f, "{}", s),
            Value::Sym(e) => write!(f, "{}", e),
            Value::Loc(l) => write!(f, "{}", l),
            Value::Uninit => write!(f, "uninit"),
            Value::Shadow => write!(f, "shadow"),
        }
    }
}

impl Value {
    pub fn int(bits: u64, width: u32) -> Self {
        Value::Int(Scalar::new(bits, width))
    }

    pub fn int_i64(value: i64, width: u32) -> Self {
        Value::Int(Scalar::from_i64(value, width))
    }

    pub fn byte(value: u8) -> Self {
        Value::int(u64::from(value), 8)
    }

    pub fn null_loc() -> Self {
        Value::Loc(Location::null())
    }

    pub fn as_int(&self) -> Option<Scalar> {
        match self {
            Value::Int(s) => Some(*s),
            _ => None,
        }
    }

    pub fn as_loc(&self) -> Option<Location> {
        match self {
            Value::Loc(l) => Some(*l),
            _ => None,
        }
    }

    pub fn as_sym(&self) -> Option<&SymExpr> {
        match self {
            Value::Sym(e) => Some(e),
            _ => None,
        }
    }

    /// Splits a branch condition into its concrete truth value or its
    /// boolean expression. Anything else is not a condition.
    pub fn as_cond(&self) -> Option<Either<bool, SymExpr>> {
        match self {
            Value::Int(s) => Some(Either::Left(!s.is_zero())),
            Value::Sym(e) if e.is_bool() => Some(Either::Right(e.clone())),
            _ => None,
        }
    }

    /// Number of heap slots this value spans when stored at a head slot.
    pub fn byte_width(&self) -> u64 {
        match self {
            Value::Int(s) => s.byte_width(),
            Value::Sym(e) => ((u64::from(e.bits()) + 7) / 8).max(1),
            Value::Loc(_) => POINTER_BYTES,
            Value::Uninit | Value::Shadow => 1,
        }
    }

    /// Variant name for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int(_) => "concrete integer",
            Value::Sym(_) => "symbolic value",
            Value::Loc(_) => "location",
            Value::Uninit => "uninitialized",
            Value::Shadow => "shadow byte",
        }
    }
}
