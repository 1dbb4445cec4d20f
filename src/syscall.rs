//! Native syscall passthrough. Concrete state memory is staged into host
//! buffers, the real syscall runs, and for inbound calls the host bytes
//! are copied back over the state. Symbolic slots survive a writeback
//! untouched, so a partially symbolic buffer keeps its symbols while the
//! concrete bytes around them refresh.

use std::ffi::CString;
use std::mem;

use log::trace;

use parking_lot::Mutex;

use crate::runtime::{
    arg, int_arg, loc_arg, non_negative, positive, singleton, Error, Outcome, Outcomes, Runtime,
};
use crate::solver::PathSolver;
use crate::state::State;
use crate::util::CStringOps;
use crate::value::{Location, Value};

/// Host syscalls run one at a time across all paths.
static NATIVE_GATE: Mutex<()> = parking_lot::const_mutex(());

/// Host-side buffer shadowing one state region, NUL-padded by one byte
/// like the C buffers it stands in for.
struct ShadowBuf {
    buf: Vec<u8>,
    loc: Location,
    size: usize,
}

impl ShadowBuf {
    fn new(loc: Location, size: usize) -> Self {
        Self {
            buf: vec![0; size + 1],
            loc,
            size,
        }
    }

    fn as_mut_ptr(&mut self) -> *mut u8 {
        self.buf.as_mut_ptr()
    }

    /// Stages the region's concrete bytes into the host buffer.
    fn fill_from(&mut self, state: &State) -> Result<(), Error> {
        copy_state_to_native(state, &self.loc, &mut self.buf[..self.size])
    }

    /// Copies host bytes back over the region.
    fn writeback(&self, state: &State) -> Result<State, Error> {
        copy_native_to_state(state, &self.loc, &self.buf[..self.size])
    }
}

fn copy_native_to_state(state: &State, loc: &Location, buf: &[u8]) -> Result<State, Error> {
    let base = loc.address();
    let len = buf.len() as u64;
    let mut next = state.clone();
    let mut i = 0u64;
    while i < len {
        match state.heap_lookup(base + i)? {
            Some(value @ (Value::Shadow | Value::Loc(_))) => {
                return Err(Error::TypeError {
                    op: "syscall",
                    expected: "raw bytes",
                    found: value.to_string(),
                });
            }
            // symbolic slots keep their symbols, the host bytes under
            // them are dropped
            Some(value @ Value::Sym(_)) => i += value.byte_width(),
            Some(value @ Value::Int(_)) => {
                let span = value.byte_width();
                for _ in 0..span {
                    if i >= len {
                        break;
                    }
                    next.write_slot(base + i, Some(Value::byte(buf[i as usize])))?;
                    i += 1;
                }
            }
            None | Some(Value::Uninit) => {
                next.write_slot(base + i, Some(Value::byte(buf[i as usize])))?;
                i += 1;
            }
        }
    }
    Ok(next)
}

fn copy_state_to_native(state: &State, loc: &Location, buf: &mut [u8]) -> Result<(), Error> {
    let base = loc.address();
    let len = buf.len() as u64;
    let mut i = 0u64;
    while i < len {
        match state.heap_lookup(base + i)? {
            // never-written slots leave the buffer byte as is
            None | Some(Value::Uninit) => i += 1,
            Some(Value::Int(s)) => {
                for byte in s.to_le_bytes() {
                    if i >= len {
                        break;
                    }
                    buf[i as usize] = byte;
                    i += 1;
                }
            }
            Some(other) => {
                return Err(Error::TypeError {
                    op: "syscall",
                    expected: "concrete bytes",
                    found: other.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn pathname_arg(
    op: &'static str,
    state: &State,
    args: &[Value],
    index: usize,
) -> Result<CString, Error> {
    let loc = loc_arg(op, args, index)?;
    let bytes = state.read_cstring(&loc)?;
    CString::new(bytes).map_err(|_| Error::InvalidArgument {
        op,
        reason: "pathname contains NUL".to_string(),
    })
}

fn dispatch(state: &State, number: i64, args: &[Value]) -> Result<(State, i64), Error> {
    let _gate = NATIVE_GATE.lock();
    let mut next = state.clone();
    let retval;
    match number {
        libc::SYS_read => {
            let fd = int_arg("read", args, 1)?;
            if fd != 0 {
                return Err(Error::InvalidArgument {
                    op: "read",
                    reason: format!("fd {} is not stdin, use pread64", fd),
                });
            }
            let count = non_negative("read", args, 3)?;
            let mut temp = ShadowBuf::new(loc_arg("read", args, 2)?, count as usize);
            retval = unsafe {
                libc::syscall(
                    libc::SYS_read,
                    fd as libc::c_long,
                    temp.as_mut_ptr(),
                    count as libc::c_long,
                )
            } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        libc::SYS_write => {
            let fd = int_arg("write", args, 1)?;
            if fd != 1 && fd != 2 {
                return Err(Error::InvalidArgument {
                    op: "write",
                    reason: format!("fd {} is not stdout or stderr, use pwrite64", fd),
                });
            }
            let count = non_negative("write", args, 3)?;
            let mut temp = ShadowBuf::new(loc_arg("write", args, 2)?, count as usize);
            temp.fill_from(&next)?;
            retval = unsafe {
                libc::syscall(
                    libc::SYS_write,
                    fd as libc::c_long,
                    temp.as_mut_ptr(),
                    count as libc::c_long,
                )
            } as i64;
        }
        libc::SYS_open => {
            if args.len() != 3 && args.len() != 4 {
                return Err(Error::InvalidArgument {
                    op: "open",
                    reason: format!("expected 2 or 3 arguments, got {}", args.len() - 1),
                });
            }
            let mode = if args.len() == 4 {
                int_arg("open", args, 3)?
            } else {
                0
            };
            let flags = int_arg("open", args, 2)?;
            let pathname = pathname_arg("open", state, args, 1)?;
            retval = unsafe {
                libc::syscall(
                    libc::SYS_open,
                    pathname.as_ptr(),
                    flags as libc::c_long,
                    mode as libc::c_long,
                )
            } as i64;
        }
        libc::SYS_close => {
            let fd = int_arg("close", args, 1)?;
            retval = unsafe { libc::syscall(libc::SYS_close, fd as libc::c_long) } as i64;
        }
        libc::SYS_stat | libc::SYS_lstat => {
            let op = if number == libc::SYS_stat { "stat" } else { "lstat" };
            let pathname = pathname_arg(op, state, args, 1)?;
            let count = mem::size_of::<libc::stat64>();
            let mut temp = ShadowBuf::new(loc_arg(op, args, 2)?, count);
            retval =
                unsafe { libc::syscall(number, pathname.as_ptr(), temp.as_mut_ptr()) } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        libc::SYS_fstat => {
            let fd = int_arg("fstat", args, 1)?;
            let count = mem::size_of::<libc::stat64>();
            let mut temp = ShadowBuf::new(loc_arg("fstat", args, 2)?, count);
            retval = unsafe {
                libc::syscall(libc::SYS_fstat, fd as libc::c_long, temp.as_mut_ptr())
            } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        libc::SYS_lseek => {
            let fd = int_arg("lseek", args, 1)?;
            let offset = int_arg("lseek", args, 2)?;
            let whence = int_arg("lseek", args, 3)?;
            retval = unsafe {
                libc::syscall(
                    libc::SYS_lseek,
                    fd as libc::c_long,
                    offset as libc::c_long,
                    whence as libc::c_long,
                )
            } as i64;
        }
        libc::SYS_ioctl => {
            let fd = int_arg("ioctl", args, 1)?;
            let request = int_arg("ioctl", args, 2)?;
            let buf = loc_arg("ioctl", args, 3)?;
            let mut temp = ShadowBuf::new(buf, buf.remaining() as usize);
            retval = unsafe {
                libc::syscall(
                    libc::SYS_ioctl,
                    fd as libc::c_long,
                    request as libc::c_long,
                    temp.as_mut_ptr(),
                )
            } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        libc::SYS_pread64 => {
            let fd = int_arg("pread64", args, 1)?;
            if fd <= 2 {
                return Err(Error::InvalidArgument {
                    op: "pread64",
                    reason: format!("fd {} is a standard stream", fd),
                });
            }
            let count = non_negative("pread64", args, 3)?;
            let offset = int_arg("pread64", args, 4)?;
            let mut temp = ShadowBuf::new(loc_arg("pread64", args, 2)?, count as usize);
            retval = unsafe {
                libc::syscall(
                    libc::SYS_pread64,
                    fd as libc::c_long,
                    temp.as_mut_ptr(),
                    count as libc::c_long,
                    offset as libc::c_long,
                )
            } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        libc::SYS_pwrite64 => {
            let fd = int_arg("pwrite64", args, 1)?;
            if fd <= 2 {
                return Err(Error::InvalidArgument {
                    op: "pwrite64",
                    reason: format!("fd {} is a standard stream", fd),
                });
            }
            let count = non_negative("pwrite64", args, 3)?;
            let offset = int_arg("pwrite64", args, 4)?;
            let mut temp = ShadowBuf::new(loc_arg("pwrite64", args, 2)?, count as usize);
            temp.fill_from(&next)?;
            retval = unsafe {
                libc::syscall(
                    libc::SYS_pwrite64,
                    fd as libc::c_long,
                    temp.as_mut_ptr(),
                    count as libc::c_long,
                    offset as libc::c_long,
                )
            } as i64;
        }
        libc::SYS_getcwd => {
            let buf = loc_arg("getcwd", args, 1)?;
            if buf.is_null() {
                return Err(Error::InvalidArgument {
                    op: "getcwd",
                    reason: "null buffer".to_string(),
                });
            }
            let count = positive("getcwd", args, 2)?;
            let mut temp = ShadowBuf::new(buf, count as usize);
            retval = unsafe {
                libc::syscall(libc::SYS_getcwd, temp.as_mut_ptr(), count as libc::c_long)
            } as i64;
            if retval >= 0 {
                next = temp.writeback(&next)?;
            }
        }
        _ => return Err(Error::UnsupportedSyscall(number)),
    }
    Ok((next, retval))
}

impl<S: PathSolver> Runtime<S> {
    /// `syscall(number, args..)`: runs the host syscall over staged
    /// buffers. The number must be a concrete 64-bit integer; the return
    /// value comes back as one.
    pub fn syscall_with<T, K>(
        &mut self,
        state: &State,
        args: &[Value],
        mut k: K,
    ) -> Result<T, Error>
    where
        T: Outcome,
        K: FnMut(State, Value) -> Result<T, Error>,
    {
        let value = arg("syscall", args, 0)?;
        let number = match value.as_int() {
            Some(s) if s.width() == 64 => s.as_i64(),
            _ => {
                return Err(Error::TypeError {
                    op: "syscall",
                    expected: "concrete 64-bit number",
                    found: value.to_string(),
                })
            }
        };

        let (next, retval) = dispatch(state, number, args)?;
        trace!("syscall {} returned {}", number, retval);
        self.notify_syscall(number, retval);
        k(next, Value::int_i64(retval, 64))
    }

    pub fn syscall(&mut self, state: &State, args: &[Value]) -> Result<Outcomes, Error> {
        self.syscall_with(state, args, singleton)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::ffi::OsStrExt;
    use std::path::PathBuf;

    use super::*;
    use crate::expr::{SymExpr, VarSource};
    use crate::solver::Decide;
    use crate::value::Region;

    fn num(number: i64) -> Value {
        Value::int_i64(number, 64)
    }

    fn runtime() -> Runtime<Decide> {
        Runtime::new(Decide(true))
    }

    fn scratch_file(tag: &str, contents: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(format!("symex-rt-{}-{}", tag, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    // lays the path out as a C string at the bottom of the heap, then a
    // scratch buffer of `extra` bytes
    fn with_pathname(path: &PathBuf, extra: u64) -> (State, Location, Location) {
        let mut values = path
            .as_os_str()
            .as_bytes()
            .iter()
            .copied()
            .map(Value::byte)
            .collect::<Vec<_>>();
        values.push(Value::byte(0));
        let len = values.len() as u64;
        let state = State::new()
            .heap_append(&values)
            .unwrap()
            .heap_alloc(extra)
            .unwrap();
        let path_loc = Location::new(0, len, Region::Heap);
        let buf_loc = Location::new(len, extra, Region::Heap);
        (state, path_loc, buf_loc)
    }

    #[test]
    fn getcwd_round_trips_through_the_state() {
        let mut rt = runtime();
        let state = State::new().heap_alloc(512).unwrap();
        let buf = Location::new(0, 512, Region::Heap);

        let outcomes = rt
            .syscall(
                &state,
                &[num(libc::SYS_getcwd), Value::Loc(buf), Value::int(512, 64)],
            )
            .unwrap();
        let (next, value) = &outcomes[0];
        assert!(value.as_int().unwrap().as_i64() > 0);

        let cwd = next.read_cstring(&buf).unwrap();
        let expected = std::env::current_dir().unwrap();
        assert_eq!(cwd, expected.as_os_str().as_bytes());
    }

    #[test]
    fn open_pread_close_pull_file_bytes_into_the_state() {
        let path = scratch_file("pread", b"hello world");
        let (state, path_loc, buf) = with_pathname(&path, 16);
        let mut rt = runtime();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_open),
                    Value::Loc(path_loc),
                    num(libc::O_RDONLY as i64),
                ],
            )
            .unwrap();
        let (state, fd_value) = outcomes[0].clone();
        let fd = fd_value.as_int().unwrap().as_i64();
        assert!(fd > 2);

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_pread64),
                    num(fd),
                    Value::Loc(buf),
                    Value::int(5, 64),
                    Value::int(6, 64),
                ],
            )
            .unwrap();
        let (state, count) = outcomes[0].clone();
        assert_eq!(count, Value::int_i64(5, 64));
        for (i, byte) in b"world".iter().enumerate() {
            assert_eq!(
                state.at(buf.address() + i as u64).unwrap(),
                Value::byte(*byte)
            );
        }

        let outcomes = rt.syscall(&state, &[num(libc::SYS_close), num(fd)]).unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(0, 64));

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn lseek_reports_the_file_size() {
        let path = scratch_file("lseek", b"hello world");
        let (state, path_loc, _) = with_pathname(&path, 0);
        let mut rt = runtime();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_open),
                    Value::Loc(path_loc),
                    num(libc::O_RDONLY as i64),
                ],
            )
            .unwrap();
        let (state, fd_value) = outcomes[0].clone();
        let fd = fd_value.as_int().unwrap().as_i64();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_lseek),
                    num(fd),
                    Value::int(0, 64),
                    num(libc::SEEK_END as i64),
                ],
            )
            .unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(11, 64));

        rt.syscall(&outcomes[0].0, &[num(libc::SYS_close), num(fd)])
            .unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn pwrite_flushes_state_bytes_to_the_file() {
        let path = scratch_file("pwrite", b"..........");
        let (state, path_loc, _) = with_pathname(&path, 0);
        let payload = b"RUST!".iter().copied().map(Value::byte).collect::<Vec<_>>();
        let buf = Location::new(state.heap_size(), 5, Region::Heap);
        let state = state.heap_append(&payload).unwrap();
        let mut rt = runtime();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_open),
                    Value::Loc(path_loc),
                    num(libc::O_WRONLY as i64),
                ],
            )
            .unwrap();
        let (state, fd_value) = outcomes[0].clone();
        let fd = fd_value.as_int().unwrap().as_i64();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_pwrite64),
                    num(fd),
                    Value::Loc(buf),
                    Value::int(5, 64),
                    Value::int(2, 64),
                ],
            )
            .unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(5, 64));

        rt.syscall(&outcomes[0].0, &[num(libc::SYS_close), num(fd)])
            .unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"..RUST!...");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn fstat_fills_the_whole_buffer() {
        let path = scratch_file("fstat", b"hello world");
        let stat_size = mem::size_of::<libc::stat64>() as u64;
        let (state, path_loc, buf) = with_pathname(&path, stat_size);
        let mut rt = runtime();

        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_open),
                    Value::Loc(path_loc),
                    num(libc::O_RDONLY as i64),
                ],
            )
            .unwrap();
        let (state, fd_value) = outcomes[0].clone();
        let fd = fd_value.as_int().unwrap().as_i64();

        let outcomes = rt
            .syscall(
                &state,
                &[num(libc::SYS_fstat), num(fd), Value::Loc(buf)],
            )
            .unwrap();
        let (state, value) = outcomes[0].clone();
        assert_eq!(value, Value::int_i64(0, 64));
        for i in 0..stat_size {
            assert!(matches!(
                state.at(buf.address() + i).unwrap(),
                Value::Int(_)
            ));
        }

        rt.syscall(&state, &[num(libc::SYS_close), num(fd)]).unwrap();
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn write_accepts_standard_streams_only() {
        let mut rt = runtime();
        let state = State::new().heap_alloc(1).unwrap();
        let buf = Location::new(0, 1, Region::Heap);

        // zero-length write keeps the test output clean
        let outcomes = rt
            .syscall(
                &state,
                &[
                    num(libc::SYS_write),
                    Value::int_i64(1, 64),
                    Value::Loc(buf),
                    Value::int(0, 64),
                ],
            )
            .unwrap();
        assert_eq!(outcomes[0].1, Value::int_i64(0, 64));

        assert!(matches!(
            rt.syscall(
                &state,
                &[
                    num(libc::SYS_write),
                    Value::int_i64(5, 64),
                    Value::Loc(buf),
                    Value::int(0, 64),
                ],
            ),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn read_accepts_stdin_only() {
        let mut rt = runtime();
        let state = State::new().heap_alloc(4).unwrap();
        let buf = Location::new(0, 4, Region::Heap);

        assert!(matches!(
            rt.syscall(
                &state,
                &[
                    num(libc::SYS_read),
                    Value::int_i64(4, 64),
                    Value::Loc(buf),
                    Value::int(4, 64),
                ],
            ),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn unsupported_and_malformed_numbers_are_rejected() {
        let mut rt = runtime();
        let state = State::new();

        assert!(matches!(
            rt.syscall(&state, &[num(libc::SYS_chdir)]),
            Err(Error::UnsupportedSyscall(_))
        ));
        assert!(matches!(
            rt.syscall(&state, &[Value::int(1, 32)]),
            Err(Error::TypeError { .. })
        ));
        let vars = VarSource::new();
        assert!(matches!(
            rt.syscall(&state, &[Value::Sym(SymExpr::ivar(vars.fresh(64)))]),
            Err(Error::TypeError { .. })
        ));
    }

    #[test]
    fn writeback_preserves_symbolic_slots() {
        let vars = VarSource::new();
        let x = SymExpr::ivar(vars.fresh(8));
        let state = State::new()
            .heap_alloc(4)
            .unwrap()
            .update(0, Value::byte(1))
            .unwrap()
            .update(1, Value::Sym(x.clone()))
            .unwrap()
            .update(3, Value::byte(4))
            .unwrap();
        let loc = Location::new(0, 4, Region::Heap);

        let next = copy_native_to_state(&state, &loc, &[0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
        assert_eq!(next.at(0).unwrap(), Value::byte(0xaa));
        assert_eq!(next.at(1).unwrap(), Value::Sym(x));
        assert_eq!(next.at(2).unwrap(), Value::byte(0xcc));
        assert_eq!(next.at(3).unwrap(), Value::byte(0xdd));
    }

    #[test]
    fn writeback_respans_wide_integers() {
        let state = State::new()
            .heap_alloc(4)
            .unwrap()
            .update_sized(0, Value::int(0x11223344, 32), 4)
            .unwrap();
        let loc = Location::new(0, 4, Region::Heap);

        let next = copy_native_to_state(&state, &loc, &[1, 2, 3, 4]).unwrap();
        for i in 0..4 {
            assert_eq!(next.at(i).unwrap(), Value::byte(i as u8 + 1));
        }
    }

    #[test]
    fn writeback_rejects_pointer_and_shadow_slots() {
        let inner = Location::new(0, 8, Region::Heap);
        let state = State::new()
            .heap_alloc(9)
            .unwrap()
            .update_sized(0, Value::Loc(inner), 8)
            .unwrap();
        let loc = Location::new(0, 9, Region::Heap);

        assert!(matches!(
            copy_native_to_state(&state, &loc, &[0; 9]),
            Err(Error::TypeError { .. })
        ));
        // starting mid-object lands on a shadow byte
        assert!(matches!(
            copy_native_to_state(&state, &(loc + 1), &[0; 8]),
            Err(Error::TypeError { .. })
        ));
    }

    #[test]
    fn staging_decomposes_wide_integers() {
        let state = State::new()
            .heap_alloc(6)
            .unwrap()
            .update_sized(0, Value::int(0x44332211, 32), 4)
            .unwrap()
            .update(4, Value::byte(0x55))
            .unwrap();
        let loc = Location::new(0, 6, Region::Heap);

        let mut buf = [0xffu8; 6];
        copy_state_to_native(&state, &loc, &mut buf).unwrap();
        assert_eq!(buf, [0x11, 0x22, 0x33, 0x44, 0x55, 0xff]);
    }

    #[test]
    fn staging_rejects_symbolic_bytes() {
        let vars = VarSource::new();
        let state = State::new()
            .heap_alloc(2)
            .unwrap()
            .update(0, Value::Sym(SymExpr::ivar(vars.fresh(8))))
            .unwrap();
        let loc = Location::new(0, 2, Region::Heap);

        let mut buf = [0u8; 2];
        assert!(matches!(
            copy_state_to_native(&state, &loc, &mut buf),
            Err(Error::TypeError { .. })
        ));
    }
}
