use std::fmt;
use std::ops::Deref;
use std::ops::{Add, BitAnd, BitOr, BitXor, Mul, Neg, Not, Sub};
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::Arc;

use hashconsing::{consign, HConsed, HashConsign};

use fnv::FnvHashMap as HashMap;

use crate::value::Scalar;

consign! {
    let EXPR = consign(10 * 1024 /* = capacity */) for Expr;
}

/// Source of fresh symbolic variable identifiers. Handles are cheap to
/// clone and share one counter; `starting_at` partitions the id space
/// across exploration workers.
#[derive(Debug, Clone)]
pub struct VarSource(Arc<AtomicU64>);

impl Default for VarSource {
    fn default() -> Self {
        Self::new()
    }
}

impl VarSource {
    pub fn new() -> Self {
        Self(Arc::new(AtomicU64::new(0)))
    }

    pub fn starting_at(id: u64) -> Self {
        Self(Arc::new(AtomicU64::new(id)))
    }

    pub fn fresh(&self, bits: u32) -> IVar {
        IVar(self.0.fetch_add(1, SeqCst), bits)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IVar(u64, u32);

impl fmt::Display for IVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ivar{:x}:{}", self.id(), self.bits())
    }
}

impl IVar {
    pub fn bits(&self) -> u32 {
        self.1
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SymExpr(HConsed<Expr>);

impl fmt::Display for SymExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        (**self).fmt(f)
    }
}

impl Deref for SymExpr {
    type Target = Expr;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl From<Scalar> for SymExpr {
    fn from(v: Scalar) -> Self {
        SymExpr::val(v)
    }
}

impl From<IVar> for SymExpr {
    fn from(v: IVar) -> Self {
        SymExpr::ivar(v)
    }
}

impl From<Expr> for SymExpr {
    fn from(e: Expr) -> Self {
        Self(EXPR.mk(e))
    }
}

impl From<HConsed<Expr>> for SymExpr {
    fn from(e: HConsed<Expr>) -> Self {
        Self(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum UnOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinOp {
    And,
    Or,
    Xor,
    Add,
    Sub,
    Mul,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BinRel {
    Eq,
    Ne,
    Lt,
    Le,
    Slt,
    Sle,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Expr {
    BinRel(BinRel, SymExpr, SymExpr), // T * T -> bool

    UnOp(UnOp, SymExpr),            // T -> T
    BinOp(BinOp, SymExpr, SymExpr), // T * T -> T

    Val(Scalar),

    IVar(IVar), // pure symbolic variable
}

impl Expr {
    fn fmt_l1(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Val(v) => write!(f, "{}", v),
            Expr::IVar(v) => write!(f, "{}", v),

            expr => write!(f, "({})", expr),
        }
    }

    fn fmt_l2(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::UnOp(UnOp::Neg, expr) => {
                write!(f, "-")?;
                expr.fmt_l1(f)
            }
            Expr::UnOp(UnOp::Not, expr) => {
                write!(f, "!")?;
                expr.fmt_l1(f)
            }
            expr => expr.fmt_l1(f),
        }
    }

    fn fmt_l3(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BinOp(BinOp::Mul, e1, e2) => {
                e1.fmt_l3(f)?;
                write!(f, " * ")?;
                e2.fmt_l2(f)
            }
            expr => expr.fmt_l2(f),
        }
    }

    fn fmt_l4(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BinOp(BinOp::Add, e1, e2) => {
                e1.fmt_l4(f)?;
                write!(f, " + ")?;
                e2.fmt_l3(f)
            }
            Expr::BinOp(BinOp::Sub, e1, e2) => {
                e1.fmt_l4(f)?;
                write!(f, " - ")?;
                e2.fmt_l3(f)
            }
            expr => expr.fmt_l3(f),
        }
    }

    fn fmt_l5(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BinRel(BinRel::Lt, e1, e2) => {
                e1.fmt_l5(f)?;
                write!(f, " < ")?;
                e2.fmt_l4(f)
            }
            Expr::BinRel(BinRel::Le, e1, e2) => {
                e1.fmt_l5(f)?;
                write!(f, " <= ")?;
                e2.fmt_l4(f)
            }
            Expr::BinRel(BinRel::Slt, e1, e2) => {
                e1.fmt_l5(f)?;
                write!(f, " s< ")?;
                e2.fmt_l4(f)
            }
            Expr::BinRel(BinRel::Sle, e1, e2) => {
                e1.fmt_l5(f)?;
                write!(f, " s<= ")?;
                e2.fmt_l4(f)
            }
            expr => expr.fmt_l4(f),
        }
    }

    fn fmt_l6(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::BinRel(BinRel::Eq, e1, e2) => {
                e1.fmt_l6(f)?;
                write!(f, " == ")?;
                e2.fmt_l5(f)
            }
            Expr::BinRel(BinRel::Ne, e1, e2) => {
                e1.fmt_l6(f)?;
                write!(f, " != ")?;
                e2.fmt_l5(f)
            }
            expr => expr.fmt_l5(f),
        }
    }

    fn fmt_l7(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Expr::BinOp(BinOp::And, e1, e2) = self {
            e1.fmt_l7(f)?;
            write!(f, " & ")?;
            e2.fmt_l6(f)
        } else {
            self.fmt_l6(f)
        }
    }

    fn fmt_l8(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Expr::BinOp(BinOp::Xor, e1, e2) = self {
            e1.fmt_l8(f)?;
            write!(f, " ^ ")?;
            e2.fmt_l7(f)
        } else {
            self.fmt_l7(f)
        }
    }

    fn fmt_l9(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Expr::BinOp(BinOp::Or, e1, e2) = self {
            e1.fmt_l9(f)?;
            write!(f, " | ")?;
            e2.fmt_l8(f)
        } else {
            self.fmt_l8(f)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_l9(f)
    }
}

impl From<Scalar> for Expr {
    fn from(t: Scalar) -> Expr {
        Expr::Val(t)
    }
}

impl From<bool> for Expr {
    fn from(t: bool) -> Expr {
        Expr::Val(Scalar::bool(t))
    }
}

impl SymExpr {
    pub fn val<T: Into<Expr>>(t: T) -> SymExpr {
        EXPR.mk(t.into()).into()
    }

    pub fn ivar(ivar: IVar) -> SymExpr {
        EXPR.mk(Expr::IVar(ivar)).into()
    }

    pub fn lift_unop(op: UnOp, v: SymExpr) -> SymExpr {
        EXPR.mk(Expr::UnOp(op, v)).into()
    }

    pub fn neg(v: SymExpr) -> SymExpr {
        if let Expr::Val(ref v) = &*v {
            Self::val(-*v)
        } else if let Expr::UnOp(UnOp::Neg, vv) = &*v {
            vv.clone()
        } else {
            Self::lift_unop(UnOp::Neg, v)
        }
    }

    pub fn not(v: SymExpr) -> SymExpr {
        if let Expr::Val(ref v) = &*v {
            Self::val(!*v)
        } else if let Expr::UnOp(UnOp::Not, vv) = &*v {
            vv.clone()
        } else {
            Self::lift_unop(UnOp::Not, v)
        }
    }

    pub fn lift_binop(op: BinOp, l: SymExpr, r: SymExpr) -> SymExpr {
        assert_eq!(l.bits(), r.bits());

        EXPR.mk(Expr::BinOp(op, l, r)).into()
    }

    pub fn and(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_ones() {
            l
        } else if r.is_zero() || l.is_ones() {
            r
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv & *rv)
        } else {
            Self::lift_binop(BinOp::And, l, r)
        }
    }

    pub fn or(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_ones() {
            r
        } else if r.is_zero() || l.is_ones() {
            l
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv | *rv)
        } else {
            Self::lift_binop(BinOp::Or, l, r)
        }
    }

    pub fn xor(l: SymExpr, r: SymExpr) -> SymExpr {
        assert_eq!(l.bits(), r.bits());

        if l == r {
            Self::val(Scalar::new(0, l.bits()))
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv ^ *rv)
        } else if r.is_ones() {
            Self::not(l)
        } else if l.is_ones() {
            Self::not(r)
        } else if r.is_zero() {
            l
        } else if l.is_zero() {
            r
        } else {
            Self::lift_binop(BinOp::Xor, l, r)
        }
    }

    pub fn add(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() {
            r
        } else if r.is_zero() {
            l
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv + *rv)
        } else {
            Self::lift_binop(BinOp::Add, l, r)
        }
    }

    pub fn sub(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() {
            Self::neg(r)
        } else if r.is_zero() {
            l
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv - *rv)
        } else {
            Self::lift_binop(BinOp::Sub, l, r)
        }
    }

    pub fn mul(l: SymExpr, r: SymExpr) -> SymExpr {
        if l.is_zero() || r.is_zero() {
            Self::val(Scalar::new(0, l.bits()))
        } else if r.is_one() {
            l
        } else if l.is_one() {
            r
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(*lv * *rv)
        } else {
            Self::lift_binop(BinOp::Mul, l, r)
        }
    }

    pub fn lift_binrel(op: BinRel, l: SymExpr, r: SymExpr) -> SymExpr {
        assert_eq!(l.bits(), r.bits());

        EXPR.mk(Expr::BinRel(op, l, r)).into()
    }

    pub fn eq(self, r: SymExpr) -> SymExpr {
        let l = self;
        if l == r {
            // trivial
            Self::val(true)
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv == rv)
        } else {
            Self::lift_binrel(BinRel::Eq, l, r)
        }
    }

    pub fn ne(self, r: SymExpr) -> SymExpr {
        let l = self;
        if l == r {
            // trivial
            Self::val(false)
        } else if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv != rv)
        } else {
            Self::lift_binrel(BinRel::Ne, l, r)
        }
    }

    pub fn lt(self, r: SymExpr) -> SymExpr {
        let l = self;
        if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv.bits() < rv.bits())
        } else {
            Self::lift_binrel(BinRel::Lt, l, r)
        }
    }

    pub fn le(self, r: SymExpr) -> SymExpr {
        let l = self;
        if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv.bits() <= rv.bits())
        } else {
            Self::lift_binrel(BinRel::Le, l, r)
        }
    }

    pub fn slt(self, r: SymExpr) -> SymExpr {
        let l = self;
        if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv.as_i64() < rv.as_i64())
        } else {
            Self::lift_binrel(BinRel::Slt, l, r)
        }
    }

    pub fn sle(self, r: SymExpr) -> SymExpr {
        let l = self;
        if let (Expr::Val(ref lv), Expr::Val(ref rv)) = (&*l, &*r) {
            Self::val(lv.as_i64() <= rv.as_i64())
        } else {
            Self::lift_binrel(BinRel::Sle, l, r)
        }
    }

    pub fn uid(&self) -> u64 {
        self.0.uid()
    }

    pub fn bits(&self) -> u32 {
        match &**self {
            Expr::Val(ref v) => v.width(),
            Expr::IVar(ref v) => v.bits(),
            Expr::UnOp(_, ref v) | Expr::BinOp(_, ref v, _) => v.bits(),
            Expr::BinRel(_, _, _) => 1, // bool
        }
    }

    pub fn is_bool(&self) -> bool {
        self.bits() == 1
    }

    pub fn is_one(&self) -> bool {
        matches!(&**self, Expr::Val(ref v) if v.is_one())
    }

    pub fn is_ones(&self) -> bool {
        matches!(&**self, Expr::Val(ref v) if v.is_ones())
    }

    pub fn is_zero(&self) -> bool {
        matches!(&**self, Expr::Val(ref v) if v.is_zero())
    }

    /// Evaluates under a concrete assignment. `None` when some variable
    /// the expression mentions has no binding, or when a subterm is wider
    /// than the 64-bit words this evaluator computes with. Relations
    /// yield 0 or 1.
    pub fn eval<A>(&self, assign: &A) -> Option<u64>
    where
        A: Fn(&IVar) -> Option<u64>,
    {
        let mut memo = HashMap::default();
        self.eval_in(assign, &mut memo)
    }

    fn eval_in<A>(&self, assign: &A, memo: &mut HashMap<u64, Option<u64>>) -> Option<u64>
    where
        A: Fn(&IVar) -> Option<u64>,
    {
        if self.bits() > 64 {
            return None;
        }
        if let Some(cached) = memo.get(&self.uid()) {
            return *cached;
        }

        let value = match &**self {
            Expr::Val(ref v) => Some(v.bits()),
            Expr::IVar(ref v) => assign(v).map(|bits| Scalar::new(bits, v.bits()).bits()),
            Expr::UnOp(op, ref e) => e.eval_in(assign, memo).map(|bits| {
                let v = Scalar::new(bits, e.bits());
                match op {
                    UnOp::Not => (!v).bits(),
                    UnOp::Neg => (-v).bits(),
                }
            }),
            Expr::BinOp(op, ref l, ref r) => {
                match (l.eval_in(assign, memo), r.eval_in(assign, memo)) {
                    (Some(lb), Some(rb)) => {
                        let lv = Scalar::new(lb, l.bits());
                        let rv = Scalar::new(rb, r.bits());
                        Some(match op {
                            BinOp::And => (lv & rv).bits(),
                            BinOp::Or => (lv | rv).bits(),
                            BinOp::Xor => (lv ^ rv).bits(),
                            BinOp::Add => (lv + rv).bits(),
                            BinOp::Sub => (lv - rv).bits(),
                            BinOp::Mul => (lv * rv).bits(),
                        })
                    }
                    _ => None,
                }
            }
            Expr::BinRel(op, ref l, ref r) => {
                match (l.eval_in(assign, memo), r.eval_in(assign, memo)) {
                    (Some(lb), Some(rb)) => {
                        let lv = Scalar::new(lb, l.bits());
                        let rv = Scalar::new(rb, r.bits());
                        Some(u64::from(match op {
                            BinRel::Eq => lv == rv,
                            BinRel::Ne => lv != rv,
                            BinRel::Lt => lv.bits() < rv.bits(),
                            BinRel::Le => lv.bits() <= rv.bits(),
                            BinRel::Slt => lv.as_i64() < rv.as_i64(),
                            BinRel::Sle => lv.as_i64() <= rv.as_i64(),
                        }))
                    }
                    _ => None,
                }
            }
        };

        memo.insert(self.uid(), value);
        value
    }
}

impl Add for &'_ SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: Self) -> Self::Output {
        SymExpr::add(self.clone(), rhs.clone())
    }
}

impl Add for SymExpr {
    type Output = SymExpr;

    fn add(self, rhs: Self) -> Self::Output {
        SymExpr::add(self, rhs)
    }
}

impl BitAnd for &'_ SymExpr {
    type Output = SymExpr;

    fn bitand(self, rhs: Self) -> Self::Output {
        SymExpr::and(self.clone(), rhs.clone())
    }
}

impl BitAnd for SymExpr {
    type Output = SymExpr;

    fn bitand(self, rhs: Self) -> Self::Output {
        SymExpr::and(self, rhs)
    }
}

impl BitOr for &'_ SymExpr {
    type Output = SymExpr;

    fn bitor(self, rhs: Self) -> Self::Output {
        SymExpr::or(self.clone(), rhs.clone())
    }
}

impl BitOr for SymExpr {
    type Output = SymExpr;

    fn bitor(self, rhs: Self) -> Self::Output {
        SymExpr::or(self, rhs)
    }
}

impl BitXor for &'_ SymExpr {
    type Output = SymExpr;

    fn bitxor(self, rhs: Self) -> Self::Output {
        SymExpr::xor(self.clone(), rhs.clone())
    }
}

impl BitXor for SymExpr {
    type Output = SymExpr;

    fn bitxor(self, rhs: Self) -> Self::Output {
        SymExpr::xor(self, rhs)
    }
}

impl Mul for &'_ SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: Self) -> Self::Output {
        SymExpr::mul(self.clone(), rhs.clone())
    }
}

impl Mul for SymExpr {
    type Output = SymExpr;

    fn mul(self, rhs: Self) -> Self::Output {
        SymExpr::mul(self, rhs)
    }
}

impl Neg for &'_ SymExpr {
    type Output = SymExpr;

    fn neg(self) -> Self::Output {
        SymExpr::neg(self.clone())
    }
}

impl Neg for SymExpr {
    type Output = SymExpr;

    fn neg(self) -> Self::Output {
        SymExpr::neg(self)
    }
}

impl Not for &'_ SymExpr {
    type Output = SymExpr;

    fn not(self) -> Self::Output {
        SymExpr::not(self.clone())
    }
}

impl Not for SymExpr {
    type Output = SymExpr;

    fn not(self) -> Self::Output {
        SymExpr::not(self)
    }
}

impl Sub for &'_ SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        SymExpr::sub(self.clone(), rhs.clone())
    }
}

impl Sub for SymExpr {
    type Output = SymExpr;

    fn sub(self, rhs: Self) -> Self::Output {
        SymExpr::sub(self, rhs)
    }
}
