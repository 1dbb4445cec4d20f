use crate::runtime::Error;
use crate::state::State;
use crate::value::{Location, Value};

/// NUL-terminated string reads over state memory, one byte per slot.
pub trait CStringOps {
    /// Collects concrete bytes from `loc` up to (not including) the
    /// terminating NUL.
    fn read_cstring(&self, loc: &Location) -> Result<Vec<u8>, Error>;
}

impl CStringOps for State {
    fn read_cstring(&self, loc: &Location) -> Result<Vec<u8>, Error> {
        let mut bytes = Vec::new();
        let mut addr = loc.address();
        loop {
            let value = self.at(addr)?;
            match value {
                Value::Int(s) if s.byte_width() == 1 => {
                    let byte = s.as_u64() as u8;
                    if byte == 0 {
                        return Ok(bytes);
                    }
                    bytes.push(byte);
                }
                other => {
                    return Err(Error::TypeError {
                        op: "read_cstring",
                        expected: "concrete byte",
                        found: other.to_string(),
                    })
                }
            }
            addr += 1;
        }
    }
}
