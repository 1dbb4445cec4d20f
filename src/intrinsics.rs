//! External-function primitives. Each models one C library entry point
//! natively instead of symbolically executing its body; all of them come
//! in a continuation form (`*_with`) and a collecting form that returns
//! [`Outcomes`](crate::runtime::Outcomes).

pub mod alloc;
pub mod memory;
pub mod symbolic;
pub mod vararg;
