use std::io;

/// Types that can be written as the body of a frame.
pub trait Serialize<'a> {
    /// Writes the owned part of the message into `buf`.
    ///
    /// # Arguments
    /// * `buf` - The frame buffer, already holding the length prefix.
    ///
    /// # Returns
    /// An optional slice of bytes to be written right after `buf` without being copied.
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]>;
}

/// Types that can be read back from the body of a frame.
pub trait Deserialize<'a>: Sized {
    /// Reads an instance of `Self` from `buf`, possibly borrowing from it.
    ///
    /// # Arguments
    /// * `buf` - The body of a received frame.
    ///
    /// # Returns
    /// The deserialized value or an `io::Error` if the bytes are malformed.
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self>;
}
