use std::io;

/// Decodes a message out of a received frame.
///
/// The frame is 4 byte aligned, implementors may borrow numeric slices from it.
pub trait Deserialize<'a>: Sized {
    fn deserialize(frame: &'a [u8]) -> io::Result<Self>;
}
