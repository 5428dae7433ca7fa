pub mod bitmap;
pub mod message;

pub use bitmap::{bitmap_to_set, set_to_bitmap, BF};
pub use message::{Field, FieldError, Fields, Message, Opcode};
