//! In-flight message module
//!
//! A [`Message`] is one request sent to the remote node,
//! along with the knowledge of how to interpret
//! the PDUs which arrive in response to it.
use snafu::{Backtrace, OptionExt, ResultExt, Snafu};
use tracing::{trace, warn};

use dicom_dictionary_std::tags;

use crate::dimse::{command, CommandDatasetType, CommandSet, DimseStatus};
use crate::pdu::{
    AbortRQSource, AssociationAC, AssociationRJ, AssociationRQ, PDataValue, PDataValueType, Pdu,
};

use super::ErrorKind;

/// An error interpreting a response PDU.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum ResponseError {
    #[snafu(display("Unexpected response PDU: {}", pdu.short_description()))]
    UnexpectedPdu { pdu: Box<Pdu>, backtrace: Backtrace },

    #[snafu(display("Association rejected by the remote node: {}", association_rj.source))]
    Rejected {
        association_rj: AssociationRJ,
        backtrace: Backtrace,
    },

    #[snafu(display("Association aborted by the remote node ({})", abort_source))]
    Aborted {
        abort_source: AbortRQSource,
        backtrace: Backtrace,
    },

    /// response command has no status
    MissingStatus { backtrace: Backtrace },

    #[snafu(display("Unexpected DIMSE status {:#06x}", status))]
    UnexpectedStatus { status: u16, backtrace: Backtrace },

    /// data set fragment received before its command
    DataBeforeCommand { backtrace: Backtrace },

    /// response command set is invalid
    InvalidCommand {
        #[snafu(backtrace)]
        source: command::Error,
    },
}

/// An error building the PDUs of a request.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum RequestError {
    /// could not encode the command set
    EncodeCommand {
        #[snafu(backtrace)]
        source: command::Error,
    },
}

impl ResponseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResponseError::UnexpectedPdu { .. }
            | ResponseError::DataBeforeCommand { .. }
            | ResponseError::InvalidCommand { .. } => ErrorKind::Framing,
            ResponseError::Rejected { .. } | ResponseError::Aborted { .. } => {
                ErrorKind::Negotiation
            }
            ResponseError::MissingStatus { .. } | ResponseError::UnexpectedStatus { .. } => {
                ErrorKind::UnexpectedStatus
            }
        }
    }
}

/// A request in flight.
pub trait Message {
    /// The type of a decoded response.
    type Response;

    /// The PDU carrying the request.
    fn pdu(&self) -> Result<Pdu, RequestError>;

    /// A second PDU carrying the message data, if any.
    fn data_pdu(&self) -> Option<Pdu> {
        None
    }

    /// Interpret one PDU received in response.
    ///
    /// Returns `Ok(None)` when more PDUs are needed
    /// to complete a response.
    fn decode_response(
        &mut self,
        pdu: Pdu,
    ) -> Result<Option<(Self::Response, DimseStatus)>, ResponseError>;

    /// Take in a response with a pending status,
    /// to which more responses will follow.
    fn on_pending(&mut self, _response: Self::Response) {}
}

impl<M> Message for &mut M
where
    M: Message + ?Sized,
{
    type Response = M::Response;

    fn pdu(&self) -> Result<Pdu, RequestError> {
        (**self).pdu()
    }

    fn data_pdu(&self) -> Option<Pdu> {
        (**self).data_pdu()
    }

    fn decode_response(
        &mut self,
        pdu: Pdu,
    ) -> Result<Option<(Self::Response, DimseStatus)>, ResponseError> {
        (**self).decode_response(pdu)
    }

    fn on_pending(&mut self, response: Self::Response) {
        (**self).on_pending(response)
    }
}

/// An association request (A-ASSOCIATE-RQ),
/// answered by an acknowledgement or a rejection.
#[derive(Debug, Clone, PartialEq)]
pub struct AssociateRequest {
    rq: AssociationRQ,
}

impl AssociateRequest {
    pub fn new(rq: AssociationRQ) -> Self {
        AssociateRequest { rq }
    }

    pub fn association_rq(&self) -> &AssociationRQ {
        &self.rq
    }
}

impl Message for AssociateRequest {
    type Response = AssociationAC;

    fn pdu(&self) -> Result<Pdu, RequestError> {
        Ok(Pdu::AssociationRQ(self.rq.clone()))
    }

    fn decode_response(
        &mut self,
        pdu: Pdu,
    ) -> Result<Option<(AssociationAC, DimseStatus)>, ResponseError> {
        match pdu {
            Pdu::AssociationAC(ac) => Ok(Some((ac, DimseStatus::Success))),
            Pdu::AssociationRJ(association_rj) => RejectedSnafu { association_rj }.fail(),
            Pdu::AbortRQ { source } => AbortedSnafu {
                abort_source: source,
            }
            .fail(),
            pdu => UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
        }
    }
}

/// A complete DIMSE response:
/// the command set and the data set which followed it, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct DimseResponse {
    pub presentation_context_id: u8,
    pub command: CommandSet,
    pub data: Option<Vec<u8>>,
}

/// A DIMSE request sent as P-DATA-TF,
/// optionally followed by a data set in its own P-DATA-TF.
///
/// Response fragments are reassembled
/// until the command set (and the data set it announces) is complete.
/// Responses with a pending status are retained
/// and can be retrieved with [`pending_responses`](Self::pending_responses).
#[derive(Debug, Clone, PartialEq)]
pub struct DimseMessage {
    presentation_context_id: u8,
    command: CommandSet,
    data: Option<Vec<u8>>,
    command_buffer: Vec<u8>,
    data_buffer: Vec<u8>,
    /// response command set waiting for its data set
    incomplete: Option<CommandSet>,
    pending: Vec<DimseResponse>,
}

impl DimseMessage {
    pub fn new(presentation_context_id: u8, command: CommandSet) -> Self {
        DimseMessage {
            presentation_context_id,
            command,
            data: None,
            command_buffer: Vec::new(),
            data_buffer: Vec::new(),
            incomplete: None,
            pending: Vec::new(),
        }
    }

    /// Create a C-ECHO request.
    pub fn echo(presentation_context_id: u8, message_id: u16) -> Self {
        DimseMessage::new(presentation_context_id, CommandSet::echo_rq(message_id))
    }

    /// Attach an encoded data set to the request,
    /// marking it as present in the command.
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.command.put_u16(
            tags::COMMAND_DATA_SET_TYPE,
            CommandDatasetType::Present as u16,
        );
        self.data = Some(data);
        self
    }

    pub fn presentation_context_id(&self) -> u8 {
        self.presentation_context_id
    }

    pub fn command(&self) -> &CommandSet {
        &self.command
    }

    /// The responses received so far with a pending status.
    pub fn pending_responses(&self) -> &[DimseResponse] {
        &self.pending
    }

    pub fn take_pending_responses(&mut self) -> Vec<DimseResponse> {
        std::mem::take(&mut self.pending)
    }

    fn complete(
        &self,
        presentation_context_id: u8,
        command: CommandSet,
        data: Option<Vec<u8>>,
    ) -> Result<(DimseResponse, DimseStatus), ResponseError> {
        let code = command
            .status()
            .context(InvalidCommandSnafu)?
            .context(MissingStatusSnafu)?;
        let status =
            DimseStatus::from_code(code).context(UnexpectedStatusSnafu { status: code })?;
        Ok((
            DimseResponse {
                presentation_context_id,
                command,
                data,
            },
            status,
        ))
    }

    /// Feed one presentation data value,
    /// returning the response it completes, if any.
    fn feed(
        &mut self,
        pdv: PDataValue,
    ) -> Result<Option<(DimseResponse, DimseStatus)>, ResponseError> {
        if pdv.presentation_context_id != self.presentation_context_id {
            warn!(
                "Response fragment on presentation context {}, expected {}",
                pdv.presentation_context_id, self.presentation_context_id
            );
        }
        match pdv.value_type {
            PDataValueType::Command => {
                self.command_buffer.extend_from_slice(&pdv.data);
                if !pdv.is_last {
                    return Ok(None);
                }
                let bytes = std::mem::take(&mut self.command_buffer);
                let command = CommandSet::parse(&bytes).context(InvalidCommandSnafu)?;
                trace!("Response command: {}", command);
                if command.has_data_set().context(InvalidCommandSnafu)? {
                    self.incomplete = Some(command);
                    Ok(None)
                } else {
                    self.complete(pdv.presentation_context_id, command, None)
                        .map(Some)
                }
            }
            PDataValueType::Data => {
                if self.incomplete.is_none() {
                    return DataBeforeCommandSnafu.fail();
                }
                self.data_buffer.extend_from_slice(&pdv.data);
                if !pdv.is_last {
                    return Ok(None);
                }
                let data = std::mem::take(&mut self.data_buffer);
                match self.incomplete.take() {
                    Some(command) => self
                        .complete(pdv.presentation_context_id, command, Some(data))
                        .map(Some),
                    None => DataBeforeCommandSnafu.fail(),
                }
            }
        }
    }
}

impl Message for DimseMessage {
    type Response = DimseResponse;

    fn pdu(&self) -> Result<Pdu, RequestError> {
        Ok(Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: self.presentation_context_id,
                value_type: PDataValueType::Command,
                is_last: true,
                data: self.command.encode().context(EncodeCommandSnafu)?,
            }],
        })
    }

    fn data_pdu(&self) -> Option<Pdu> {
        self.data.as_ref().map(|data| Pdu::PData {
            data: vec![PDataValue {
                presentation_context_id: self.presentation_context_id,
                value_type: PDataValueType::Data,
                is_last: true,
                data: data.clone(),
            }],
        })
    }

    fn decode_response(
        &mut self,
        pdu: Pdu,
    ) -> Result<Option<(DimseResponse, DimseStatus)>, ResponseError> {
        match pdu {
            Pdu::PData { data } => {
                let count = data.len();
                let mut outcome = None;
                for (i, pdv) in data.into_iter().enumerate() {
                    if let Some((response, status)) = self.feed(pdv)? {
                        if i + 1 == count {
                            outcome = Some((response, status));
                        } else if status.is_pending() {
                            // more fragments follow in the same PDU
                            self.on_pending(response);
                        } else {
                            warn!(
                                "Ignoring {} fragments after the final response",
                                count - i - 1
                            );
                            return Ok(Some((response, status)));
                        }
                    }
                }
                Ok(outcome)
            }
            Pdu::AbortRQ { source } => AbortedSnafu {
                abort_source: source,
            }
            .fail(),
            pdu => UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
        }
    }

    fn on_pending(&mut self, response: DimseResponse) {
        self.pending.push(response);
    }
}
