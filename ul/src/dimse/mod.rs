//! DIMSE message support module
//!
//! Only what is needed to observe the outcome of an exchange is provided:
//! the classification of [status codes](status),
//! and a [command set](command) codec
//! over the implicit VR little endian encoding
//! which DIMSE commands always use.
pub mod command;
pub mod status;

pub use command::{CommandDatasetType, CommandField, CommandSet};
pub use status::DimseStatus;
