//! murmel-protocol – Wire-Format und Nachrichten-Schema
//!
//! Definiert das TCP-Frame-Format (6-Byte-Header + Nutzdaten) und die
//! serialisierten Nachrichtentypen des Control-Kanals.

pub mod nachrichten;
pub mod wire;

pub use nachrichten::MessageType;
pub use wire::{Frame, FrameCodec, HEADER_LAENGE, MAX_NUTZDATEN_LAENGE};
