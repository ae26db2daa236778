//! Common utilities shared across the gateway

pub mod cursor;
pub mod earlydata;
pub mod error;
pub mod net;

pub use cursor::ByteReader;
pub use earlydata::decode_early_data;
pub use error::{Error, Result};
