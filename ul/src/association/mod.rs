//! DICOM association module
//!
//! This module contains the association requester state machine
//! and the pieces it is made of:
//!
//! - [`ContextIdAllocator`] hands out presentation context identifiers;
//! - the [`Message`] trait describes a PDU exchange in flight,
//!   with [`AssociateRequest`] and [`DimseMessage`] as implementations;
//! - [`dispatch`](dispatch::dispatch) drives the response loop
//!   of an exchange until a final status is observed;
//! - [`Association`] ties everything together
//!   over a [`Transport`],
//!   and is created through [`AssociationOptions`].
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};

use snafu::{Backtrace, Snafu};

use crate::pdu::{AssociationRJ, Pdu};

pub mod client;
pub mod context_id;
pub mod dispatch;
pub mod message;
pub mod syntax;

pub(crate) mod uid;

#[cfg(test)]
mod tests;

pub use client::{Association, AssociationOptions, UserInfo};
pub use context_id::ContextIdAllocator;
pub use dispatch::{dispatch, Response};
pub use message::{
    AssociateRequest, DimseMessage, DimseResponse, Message, RequestError, ResponseError,
};

/// The lifecycle states of an association.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum AssociationState {
    /// created, association not yet requested
    Idle,
    /// association request sent, awaiting the response
    Requesting,
    /// association accepted by the remote node
    Established,
    /// release request sent, awaiting the reply
    Closing,
    /// association aborted (terminal)
    Aborted,
    /// association released or connection lost (terminal)
    Closed,
}

impl AssociationState {
    /// Whether no further operations are possible in this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, AssociationState::Aborted | AssociationState::Closed)
    }
}

/// A connected, ordered and reliable byte stream
/// over which an association takes place.
pub trait Transport: Read + Write {
    /// Whether the stream is still connected to the remote node.
    fn is_connected(&self) -> bool;

    /// Shut down both directions of the stream.
    fn shutdown(&mut self) -> std::io::Result<()>;
}

impl Transport for TcpStream {
    fn is_connected(&self) -> bool {
        self.peer_addr().is_ok()
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

impl<T> Transport for &mut T
where
    T: Transport + ?Sized,
{
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        (**self).shutdown()
    }
}

/// A broad classification of association errors.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// read or write failure, or the peer disconnected
    Transport,
    /// malformed, unrecognized or unexpected protocol data
    Framing,
    /// a PDU could not be built
    Encode,
    /// a DIMSE status outside of the known ranges, or no status at all
    UnexpectedStatus,
    /// the operation is not valid in the current association state
    State,
    /// the remote node refused or broke off the negotiation
    Negotiation,
}

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Cannot {} while association is {:?}", operation, state))]
    InvalidState {
        operation: &'static str,
        state: AssociationState,
        backtrace: Backtrace,
    },

    /// maximum PDU length must be greater than zero
    InvalidMaxPdu { backtrace: Backtrace },

    /// could not connect to the remote node
    Connect {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// could not configure the connection
    ConfigureSocket {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    /// failed to encode PDU
    Encode {
        #[snafu(backtrace)]
        source: crate::pdu::writer::Error,
    },

    /// failed to build message
    BuildMessage {
        #[snafu(backtrace)]
        source: RequestError,
    },

    /// failed to send PDU on wire
    Send {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "PDU is too large ({} bytes) to be sent to the remote application entity (maximum {})",
        length,
        max_pdu_length
    ))]
    SendTooLongPdu {
        length: usize,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    /// failed to receive PDU
    Receive {
        #[snafu(backtrace)]
        source: crate::pdu::framer::Error,
    },

    /// failed to decode received PDU
    Decode {
        #[snafu(backtrace)]
        source: crate::pdu::reader::Error,
    },

    /// could not handle the response
    HandleResponse {
        #[snafu(backtrace)]
        source: ResponseError,
    },

    #[snafu(display("Protocol version mismatch: expected {}, got {}", expected, got))]
    ProtocolVersionMismatch {
        expected: u16,
        got: u16,
        backtrace: Backtrace,
    },

    /// no presentation contexts accepted by the remote node
    NoAcceptedPresentationContexts { backtrace: Backtrace },

    #[snafu(display("Accepted transfer syntax `{}` is not supported", transfer_syntax))]
    TransferSyntaxNotSupported {
        transfer_syntax: String,
        backtrace: Backtrace,
    },

    #[snafu(display("Unexpected PDU from remote node: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidState { .. } | Error::InvalidMaxPdu { .. } => ErrorKind::State,
            Error::Connect { .. } | Error::ConfigureSocket { .. } | Error::Send { .. } => {
                ErrorKind::Transport
            }
            Error::Encode { .. } | Error::BuildMessage { .. } => ErrorKind::Encode,
            Error::SendTooLongPdu { .. } => ErrorKind::Encode,
            Error::Receive { source } => {
                if source.is_transport() {
                    ErrorKind::Transport
                } else {
                    ErrorKind::Framing
                }
            }
            Error::Decode { .. } | Error::UnexpectedPdu { .. } => ErrorKind::Framing,
            Error::HandleResponse { source } => source.kind(),
            Error::ProtocolVersionMismatch { .. }
            | Error::NoAcceptedPresentationContexts { .. }
            | Error::TransferSyntaxNotSupported { .. } => ErrorKind::Negotiation,
        }
    }

    /// The rejection sent by the remote node, if that is what this error is.
    pub fn rejection(&self) -> Option<&AssociationRJ> {
        match self {
            Error::HandleResponse {
                source: ResponseError::Rejected { association_rj, .. },
            } => Some(association_rj),
            _ => None,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
