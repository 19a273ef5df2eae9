//! Response dispatch loop.
use std::io::Read;

use snafu::ResultExt;
use tracing::{debug, warn};

use crate::dimse::DimseStatus;
use crate::pdu::{read_pdu, PduFramer};

use super::message::Message;
use super::{DecodeSnafu, HandleResponseSnafu, ReceiveSnafu, Result};

/// The final response of an exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    /// the decoded response carrying the final status
    pub message: T,
    /// the final status (anything but pending)
    pub status: DimseStatus,
    /// the number of PDUs read to obtain this response,
    /// including the ones with a pending status
    pub pdus_consumed: usize,
}

/// Read and interpret PDUs in response to `message`
/// until a response with a non-pending status is obtained.
///
/// Responses with a pending status are handed over to
/// [`Message::on_pending`] and the loop continues.
/// Any failure to obtain or interpret a PDU ends the loop.
pub fn dispatch<M, R>(
    framer: &mut PduFramer,
    reader: &mut R,
    message: &mut M,
    strict: bool,
) -> Result<Response<M::Response>>
where
    M: Message + ?Sized,
    R: Read + ?Sized,
{
    let mut pdus_consumed = 0;
    loop {
        let frame = framer.next_frame(reader).context(ReceiveSnafu).map_err(|e| {
            warn!("Response loop ended after {} PDUs: {}", pdus_consumed, e);
            e
        })?;
        pdus_consumed += 1;

        let pdu = read_pdu(&mut &frame[..], framer.max_pdu_length(), strict).context(DecodeSnafu)?;
        debug!("<< {}", pdu.short_description());

        match message.decode_response(pdu).context(HandleResponseSnafu)? {
            None => continue,
            Some((response, DimseStatus::Pending)) => {
                debug!("Pending response #{}", pdus_consumed);
                message.on_pending(response);
            }
            Some((response, status)) => {
                return Ok(Response {
                    message: response,
                    status,
                    pdus_consumed,
                });
            }
        }
    }
}
