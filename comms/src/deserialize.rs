use std::io;

/// Rebuilds a value from the bytes of a single received frame.
pub trait Deserialize<'a>: Sized {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self>;
}
