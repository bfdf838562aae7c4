pub mod ring;
pub mod scratch;

pub use self::ring::ByteRing;
pub use self::scratch::{Anchor, ScratchBuffer};
