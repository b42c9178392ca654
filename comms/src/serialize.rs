use std::io;

/// Encodes a value into a frame.
///
/// Implementors write their framing bytes into `buf` and may return a trailing
/// slice that gets written right after it without being copied.
pub trait Serialize<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>>;
}
