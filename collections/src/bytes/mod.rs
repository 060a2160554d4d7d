mod cursor;
mod packet;

pub use cursor::Cursor;
pub use packet::Packet;
