//! Background tasks of a WebSocket link.

pub(crate) mod ping;
pub(crate) mod read;
pub(crate) mod write;
