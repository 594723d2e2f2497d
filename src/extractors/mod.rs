pub mod connection;

pub use connection::{ConnectionOverride, CONNECTION_HEADER};
