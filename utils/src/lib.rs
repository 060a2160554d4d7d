pub mod bytes;
/// Wrapper types for reading/writing integers in a fixed byteorder directly over packet buffers.
pub mod endian;
