use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use matches::assert_matches;

use super::{
    AssociationOptions, AssociationState, ContextIdAllocator, DimseMessage, Error, ErrorKind,
    Message, Transport,
};
use crate::dimse::{CommandSet, DimseStatus};
use crate::pdu::{
    read_pdu, write_pdu, AbortRQSource, AssociationAC, AssociationRJ, AssociationRJResult,
    AssociationRJServiceUserReason, AssociationRJSource, PDataValue, PDataValueType, Pdu,
    PresentationContextResult, PresentationContextResultReason, UserVariableItem,
    DICOM_APPLICATION_CONTEXT_NAME, MAXIMUM_PDU_SIZE,
};

const VERIFICATION: &str = "1.2.840.10008.1.1";
const EXPLICIT_VR_LE: &str = "1.2.840.10008.1.2.1";
const IMPLICIT_VR_LE: &str = "1.2.840.10008.1.2";

/// A transport which serves scripted reads
/// and records everything written to it.
#[derive(Debug, Default)]
struct MockTransport {
    reads: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    /// report a lost connection once all scripted reads were served
    disconnect_when_drained: bool,
    shutdowns: usize,
}

impl MockTransport {
    fn with_reads<I>(reads: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        MockTransport {
            reads: reads.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Decode all PDUs written so far.
    fn written_pdus(&self) -> Vec<Pdu> {
        let mut reader = &self.written[..];
        let mut pdus = Vec::new();
        while !reader.is_empty() {
            pdus.push(read_pdu(&mut reader, MAXIMUM_PDU_SIZE, true).unwrap());
        }
        pdus
    }
}

impl Read for MockTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let chunk = match self.reads.front_mut() {
            Some(chunk) => chunk,
            None => return Ok(0),
        };
        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        chunk.drain(..n);
        if chunk.is_empty() {
            self.reads.pop_front();
        }
        Ok(n)
    }
}

impl Write for MockTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Transport for MockTransport {
    fn is_connected(&self) -> bool {
        !(self.disconnect_when_drained && self.reads.is_empty())
    }

    fn shutdown(&mut self) -> std::io::Result<()> {
        self.shutdowns += 1;
        Ok(())
    }
}

fn options<'a>() -> AssociationOptions<'a> {
    AssociationOptions::new()
        .calling_ae_title("ECHO-SCU")
        .called_ae_title("ECHO-SCP")
        .context_id_allocator(Arc::new(ContextIdAllocator::new()))
}

fn encode(pdu: &Pdu) -> Vec<u8> {
    let mut out = Vec::new();
    write_pdu(&mut out, pdu).unwrap();
    out
}

fn association_ac(
    id: u8,
    reason: PresentationContextResultReason,
    transfer_syntax: &str,
    max_pdu_length: u32,
) -> Vec<u8> {
    encode(&Pdu::AssociationAC(AssociationAC {
        protocol_version: 1,
        calling_ae_title: "ECHO-SCU".to_string(),
        called_ae_title: "ECHO-SCP".to_string(),
        application_context_name: DICOM_APPLICATION_CONTEXT_NAME.to_string(),
        presentation_contexts: vec![PresentationContextResult {
            id,
            reason,
            transfer_syntax: transfer_syntax.to_string(),
        }],
        user_variables: vec![
            UserVariableItem::MaxLength(max_pdu_length),
            UserVariableItem::ImplementationClassUID("1.2.3.4".to_string()),
            UserVariableItem::ImplementationVersionName("MOCK-SCP".to_string()),
        ],
    }))
}

fn accept() -> Vec<u8> {
    association_ac(1, PresentationContextResultReason::Acceptance, EXPLICIT_VR_LE, 32_768)
}

fn echo_rsp(message_id: u16, status: u16) -> Vec<u8> {
    encode(&Pdu::PData {
        data: vec![PDataValue {
            presentation_context_id: 1,
            value_type: PDataValueType::Command,
            is_last: true,
            data: CommandSet::echo_rsp(message_id, status).encode().unwrap(),
        }],
    })
}

#[test]
fn request_accepted() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    assert_eq!(association.state(), AssociationState::Idle);
    assert!(!association.is_accepted());

    let ac = association.request(VERIFICATION).unwrap();
    assert_eq!(ac.presentation_contexts.len(), 1);
    assert_eq!(association.state(), AssociationState::Established);
    assert!(association.is_accepted());
    assert_eq!(association.presentation_context_id(), Some(1));
    assert_eq!(association.abstract_syntax(), Some(VERIFICATION));
    assert_eq!(association.transfer_syntax(), Some(EXPLICIT_VR_LE));
    assert_eq!(association.remote_max_pdu_length(), 32_768);
    assert_eq!(association.remote_implementation_class_uid(), Some("1.2.3.4"));
    assert_eq!(association.remote_implementation_version_name(), Some("MOCK-SCP"));

    let written = association.transport().written_pdus();
    assert_eq!(written.len(), 1);
    match &written[0] {
        Pdu::AssociationRQ(rq) => {
            assert_eq!(rq.protocol_version, 1);
            assert_eq!(rq.calling_ae_title, "ECHO-SCU");
            assert_eq!(rq.called_ae_title, "ECHO-SCP");
            assert_eq!(rq.application_context_name, DICOM_APPLICATION_CONTEXT_NAME);
            assert_eq!(rq.presentation_contexts.len(), 1);
            assert_eq!(rq.presentation_contexts[0].id, 1);
            assert_eq!(rq.presentation_contexts[0].abstract_syntax, VERIFICATION);
            assert_eq!(
                rq.presentation_contexts[0].transfer_syntaxes,
                vec![EXPLICIT_VR_LE.to_string(), IMPLICIT_VR_LE.to_string()]
            );
            assert!(rq
                .user_variables
                .contains(&UserVariableItem::MaxLength(16_384)));
        }
        pdu => panic!("unexpected PDU {:?}", pdu),
    }
}

#[test]
fn request_uses_injected_allocator() {
    let allocator = Arc::new(ContextIdAllocator::starting_after(255));
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = AssociationOptions::new()
        .context_id_allocator(Arc::clone(&allocator))
        .open(&mut transport)
        .unwrap();
    association.request(VERIFICATION).unwrap();
    // wrapped around to 1, which the acceptor accepted
    assert_eq!(association.presentation_context_id(), Some(1));
    assert_eq!(allocator.next_context_id(), 2);
}

#[test]
fn remote_max_pdu_length_of_zero_means_maximum() {
    let ac = association_ac(1, PresentationContextResultReason::Acceptance, IMPLICIT_VR_LE, 0);
    let mut transport = MockTransport::with_reads(vec![ac]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();
    assert_eq!(association.remote_max_pdu_length(), MAXIMUM_PDU_SIZE);
}

#[test]
fn request_rejected() {
    let rj = encode(&Pdu::AssociationRJ(AssociationRJ {
        result: AssociationRJResult::Permanent,
        source: AssociationRJSource::ServiceUser(
            AssociationRJServiceUserReason::CalledAETitleNotRecognized,
        ),
    }));
    let mut transport = MockTransport::with_reads(vec![rj]);
    let mut association = options().open(&mut transport).unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Negotiation);
    assert!(e.rejection().is_some());
    assert_eq!(association.state(), AssociationState::Closed);
    assert!(!association.is_accepted());
    // nothing but the request was sent
    assert_eq!(association.transport().written_pdus().len(), 1);
}

#[test]
fn request_without_accepted_context_aborts() {
    let ac = association_ac(
        1,
        PresentationContextResultReason::AbstractSyntaxNotSupported,
        EXPLICIT_VR_LE,
        16_384,
    );
    let mut transport = MockTransport::with_reads(vec![ac]);
    let mut association = options().open(&mut transport).unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_matches!(e, Error::NoAcceptedPresentationContexts { .. });
    assert_eq!(association.state(), AssociationState::Aborted);
    assert!(!association.is_accepted());
    let written = association.transport().written_pdus();
    assert_eq!(written.len(), 2);
    assert_eq!(
        written[1],
        Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser
        }
    );
}

#[test]
fn request_with_unsupported_transfer_syntax_aborts() {
    let ac = association_ac(
        1,
        PresentationContextResultReason::Acceptance,
        IMPLICIT_VR_LE,
        16_384,
    );
    let mut transport = MockTransport::with_reads(vec![ac]);
    let mut association = options()
        .supported_transfer_syntaxes(vec![EXPLICIT_VR_LE])
        .open(&mut transport)
        .unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_matches!(e, Error::TransferSyntaxNotSupported { ref transfer_syntax, .. } if transfer_syntax == IMPLICIT_VR_LE);
    assert_eq!(association.state(), AssociationState::Aborted);
    assert_eq!(association.transfer_syntax(), None);
}

#[test]
fn request_answered_with_unexpected_pdu_aborts() {
    let mut transport = MockTransport::with_reads(vec![encode(&Pdu::ReleaseRP)]);
    let mut association = options().open(&mut transport).unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Framing);
    assert_eq!(association.state(), AssociationState::Aborted);
    assert_matches!(
        association.transport().written_pdus().last(),
        Some(Pdu::AbortRQ { .. })
    );
}

#[test]
fn request_with_connection_lost() {
    let ac = accept();
    // the acknowledgement is cut short
    let mut transport = MockTransport::with_reads(vec![ac[..20].to_vec()]);
    let mut association = options().open(&mut transport).unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Transport);
    assert_eq!(association.state(), AssociationState::Closed);
    assert_eq!(association.transport().written_pdus().len(), 1);
}

#[test]
fn request_only_once() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_matches!(
        e,
        Error::InvalidState {
            state: AssociationState::Established,
            ..
        }
    );
    assert_eq!(e.kind(), ErrorKind::State);
}

#[test]
fn zero_max_pdu_length_is_refused() {
    let mut transport = MockTransport::default();
    let e = options()
        .max_pdu_length(0)
        .open(&mut transport)
        .unwrap_err();
    assert_matches!(e, Error::InvalidMaxPdu { .. });
}

#[test]
fn echo_with_pending_responses() {
    let mut stream = accept();
    stream.extend(echo_rsp(1, 0xFF00));
    stream.extend(echo_rsp(1, 0xFF00));
    stream.extend(echo_rsp(1, 0x0000));
    // everything arrives in a single read
    let mut transport = MockTransport::with_reads(vec![stream]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();
    assert!(!association.pending_bytes().is_empty());

    let mut echo = DimseMessage::echo(1, 1);
    let response = association.exchange(&mut echo).unwrap();
    assert_eq!(response.status, DimseStatus::Success);
    assert_eq!(response.pdus_consumed, 3);
    assert_eq!(echo.pending_responses().len(), 2);
    assert!(association.pending_bytes().is_empty());

    let written = association.transport().written_pdus();
    assert_eq!(written.len(), 2);
    assert_eq!(written[1], echo_pdu(1));
}

fn echo_pdu(message_id: u16) -> Pdu {
    DimseMessage::echo(1, message_id).pdu().unwrap()
}

#[test]
fn write_without_response() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut message = DimseMessage::new(1, CommandSet::echo_rq(2)).with_data(vec![0xAB; 8]);
    let outcome = association.write(&mut message, false).unwrap();
    assert!(outcome.is_none());

    let written = association.transport().written_pdus();
    assert_eq!(written.len(), 3);
    assert_matches!(&written[2], Pdu::PData { data } if data[0].value_type == PDataValueType::Data && data[0].data == vec![0xAB; 8]);
}

#[test]
fn write_requires_established_association() {
    let mut transport = MockTransport::default();
    let mut association = options().open(&mut transport).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.write(&mut echo, true).unwrap_err();
    assert_matches!(
        e,
        Error::InvalidState {
            state: AssociationState::Idle,
            ..
        }
    );
    assert!(association.transport().written.is_empty());
}

#[test]
fn too_long_pdu_is_not_sent() {
    let ac = association_ac(
        1,
        PresentationContextResultReason::Acceptance,
        EXPLICIT_VR_LE,
        4_096,
    );
    let mut transport = MockTransport::with_reads(vec![ac]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut message = DimseMessage::new(1, CommandSet::echo_rq(2)).with_data(vec![0; 5_000]);
    let e = association.write(&mut message, false).unwrap_err();
    assert_matches!(e, Error::SendTooLongPdu { max_pdu_length: 4_096, .. });
    assert_eq!(e.kind(), ErrorKind::Encode);
    assert_eq!(association.state(), AssociationState::Established);
    // the command fits, but is not sent without its data set
    let written = association.transport().written_pdus();
    assert_eq!(written.len(), 1);
    assert_matches!(&written[0], Pdu::AssociationRQ(_));
}

#[test]
fn request_that_cannot_be_encoded_stays_idle() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options()
        .calling_ae_title("日本")
        .open(&mut transport)
        .unwrap();

    let e = association.request(VERIFICATION).unwrap_err();
    assert_matches!(e, Error::Encode { .. });
    assert_eq!(e.kind(), ErrorKind::Encode);
    assert_eq!(association.state(), AssociationState::Idle);
    assert!(!association.is_accepted());
    assert!(association.transport().written.is_empty());
    assert_eq!(association.transport().shutdowns, 0);
}

#[test]
fn unrecognized_pdu_during_exchange_aborts() {
    let mut transport = MockTransport::with_reads(vec![
        accept(),
        vec![0x10, 0x00, 0x00, 0x00, 0x00, 0x00],
        echo_rsp(1, 0x0000),
    ]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.exchange(&mut echo).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Framing);
    assert_eq!(association.state(), AssociationState::Aborted);
    assert!(association.pending_bytes().is_empty());
    assert_eq!(
        association.transport().written_pdus().last(),
        Some(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser
        })
    );

    // no further exchange over the stale stream
    let mut echo = DimseMessage::echo(1, 2);
    assert_matches!(
        association.exchange(&mut echo),
        Err(Error::InvalidState {
            state: AssociationState::Aborted,
            ..
        })
    );
}

#[test]
fn unexpected_pdu_during_exchange_aborts() {
    let mut stream = accept();
    stream.extend(encode(&Pdu::ReleaseRQ));
    let mut transport = MockTransport::with_reads(vec![stream]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.exchange(&mut echo).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Framing);
    assert_eq!(association.state(), AssociationState::Aborted);
    assert_eq!(association.transport().shutdowns, 1);
}

#[test]
fn unknown_status_keeps_association_established() {
    let mut stream = accept();
    stream.extend(echo_rsp(1, 0x1234));
    let mut transport = MockTransport::with_reads(vec![stream, encode(&Pdu::ReleaseRP)]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.exchange(&mut echo).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::UnexpectedStatus);
    assert_eq!(association.state(), AssociationState::Established);

    association.close().unwrap();
    assert_eq!(association.state(), AssociationState::Closed);
}

#[test]
fn peer_abort_during_exchange() {
    let mut stream = accept();
    stream.extend(encode(&Pdu::AbortRQ {
        source: AbortRQSource::ServiceUser,
    }));
    let mut transport = MockTransport::with_reads(vec![stream]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.exchange(&mut echo).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Negotiation);
    assert_eq!(association.state(), AssociationState::Aborted);
}

#[test]
fn connection_lost_during_exchange() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let mut echo = DimseMessage::echo(1, 1);
    let e = association.exchange(&mut echo).unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Transport);
    assert_eq!(association.state(), AssociationState::Closed);
}

#[test]
fn close_twice_writes_once() {
    let mut transport = MockTransport::with_reads(vec![accept(), encode(&Pdu::ReleaseRP)]);
    {
        let mut association = options().open(&mut transport).unwrap();
        association.request(VERIFICATION).unwrap();

        association.close().unwrap();
        assert_eq!(association.state(), AssociationState::Closed);
        let written = association.transport().written.len();

        association.close().unwrap();
        assert_eq!(association.state(), AssociationState::Closed);
        assert_eq!(association.transport().written.len(), written);
    }
    let written = transport.written_pdus();
    assert_eq!(written.len(), 2);
    assert_eq!(written[1], Pdu::ReleaseRQ);
    assert_eq!(transport.shutdowns, 1);
}

#[test]
fn close_on_lost_connection_writes_nothing() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    transport.disconnect_when_drained = true;
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();
    let written = association.transport().written.len();

    association.close().unwrap();
    assert_eq!(association.state(), AssociationState::Closed);
    assert_eq!(association.transport().written.len(), written);
}

#[test]
fn drop_releases_established_association() {
    let mut transport = MockTransport::with_reads(vec![accept(), encode(&Pdu::ReleaseRP)]);
    {
        let mut association = options().open(&mut transport).unwrap();
        association.request(VERIFICATION).unwrap();
    }
    assert_eq!(transport.written_pdus().last(), Some(&Pdu::ReleaseRQ));
    assert_eq!(transport.shutdowns, 1);
}

#[test]
fn close_before_request_is_a_no_op() {
    let mut transport = MockTransport::default();
    let mut association = options().open(&mut transport).unwrap();
    association.close().unwrap();
    assert_eq!(association.state(), AssociationState::Idle);
    assert!(association.transport().written.is_empty());
}

#[test]
fn close_with_unexpected_reply() {
    let mut transport = MockTransport::with_reads(vec![accept(), echo_rsp(1, 0x0000)]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let e = association.close().unwrap_err();
    assert_matches!(e, Error::UnexpectedPdu { .. });
    // terminal state regardless
    assert_eq!(association.state(), AssociationState::Closed);
}

#[test]
fn close_without_reply() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    let e = association.close().unwrap_err();
    assert_eq!(e.kind(), ErrorKind::Transport);
    assert_eq!(association.state(), AssociationState::Closed);
}

#[test]
fn abort_established_association() {
    let mut transport = MockTransport::with_reads(vec![accept()]);
    let mut association = options().open(&mut transport).unwrap();
    association.request(VERIFICATION).unwrap();

    // the peer closes the connection in response
    association.abort().unwrap();
    assert_eq!(association.state(), AssociationState::Aborted);
    assert_eq!(
        association.transport().written_pdus().last(),
        Some(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser
        })
    );

    let written = association.transport().written.len();
    assert_matches!(
        association.abort(),
        Err(Error::InvalidState {
            state: AssociationState::Aborted,
            ..
        })
    );
    // closing an aborted association does nothing
    association.close().unwrap();
    assert_eq!(association.transport().written.len(), written);
}

#[test]
fn abort_idle_association() {
    let mut transport = MockTransport::default();
    let mut association = options().open(&mut transport).unwrap();
    association.abort().unwrap();
    assert_eq!(association.state(), AssociationState::Aborted);
    assert_eq!(association.transport().written_pdus().len(), 1);
}
