pub mod expr;
pub mod hooks;
pub mod intrinsics;
pub mod runtime;
pub mod solver;
pub mod state;
pub mod syscall;
pub mod util;
pub mod value;
