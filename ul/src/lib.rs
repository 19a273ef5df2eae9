//! This crate contains the association core
//! of the DICOM upper layer protocol:
//! negotiating an association with another DICOM node,
//! exchanging PDUs with it over a byte stream,
//! and tearing the association down.
//!
//! - The [`pdu`] module
//!   provides data structures representing _protocol data units_,
//!   their binary codec,
//!   and the [framer](pdu::PduFramer) which delimits complete PDUs
//!   out of an arbitrarily fragmented byte stream.
//! - The [`dimse`] module
//!   classifies DIMSE status codes
//!   and encodes and decodes DIMSE command sets.
//! - The [`association`] module
//!   comprises the association requester state machine,
//!   the in-flight message contract
//!   and the response dispatch loop.
//!
//! # Example
//!
//! ```no_run
//! # use dicom_association::{AssociationOptions, DimseMessage};
//! # fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let mut association = AssociationOptions::new()
//!     .calling_ae_title("ECHO-SCU")
//!     .establish("127.0.0.1:104", "1.2.840.10008.1.1")?;
//!
//! let pc_id = association.presentation_context_id().unwrap_or(1);
//! let response = association.exchange(&mut DimseMessage::echo(pc_id, 1))?;
//! println!("C-ECHO status: {}", response.status);
//!
//! association.close()?;
//! # Ok(())
//! # }
//! ```

pub mod association;
pub mod dimse;
pub mod pdu;

/// The current implementation class UID generically referring to DICOM-rs.
///
/// Automatically generated as per the standard, part 5, section B.2.
///
/// This UID may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_CLASS_UID: &str = "2.25.156227610253341005307660858504280353500";

/// The current implementation version name.
///
/// This name may change in future versions,
/// even between patch versions.
pub const IMPLEMENTATION_VERSION_NAME: &str = "DICOM-ASSOC 0.1";

// re-exports

pub use association::{
    Association, AssociationOptions, AssociationState, ContextIdAllocator, DimseMessage, Message,
    Transport,
};
pub use dimse::DimseStatus;
pub use pdu::read_pdu;
pub use pdu::write_pdu;
pub use pdu::{Pdu, PduFramer};
