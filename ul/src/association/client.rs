//! Association requester module
//!
//! The module provides an abstraction for a DICOM association
//! in which this application entity is the one requesting the association.
//! See [`AssociationOptions`](self::AssociationOptions)
//! for details and examples on how to create an association.
use std::{
    borrow::Cow,
    io::Write,
    net::{TcpStream, ToSocketAddrs},
    sync::Arc,
    time::Duration,
};

use snafu::{ensure, ResultExt};
use tracing::{debug, warn};

use crate::{
    pdu::{
        read_pdu, write_pdu, AbortRQSource, AssociationAC, AssociationRQ, Pdu, PduFramer,
        PresentationContextProposed, PresentationContextResultReason, UserVariableItem,
        DEFAULT_MAX_PDU, DICOM_APPLICATION_CONTEXT_NAME, MAXIMUM_PDU_SIZE, PDU_HEADER_SIZE,
    },
    IMPLEMENTATION_CLASS_UID, IMPLEMENTATION_VERSION_NAME,
};

use super::{
    context_id::ContextIdAllocator,
    dispatch::{dispatch, Response},
    message::{AssociateRequest, Message, ResponseError},
    syntax::{is_supported, is_supported_in},
    uid::trim_uid,
    AssociationState, BuildMessageSnafu, ConfigureSocketSnafu, ConnectSnafu, DecodeSnafu,
    EncodeSnafu, Error, ErrorKind, InvalidMaxPduSnafu, InvalidStateSnafu,
    NoAcceptedPresentationContextsSnafu, ProtocolVersionMismatchSnafu, ReceiveSnafu, Result,
    SendSnafu, SendTooLongPduSnafu, TransferSyntaxNotSupportedSnafu, Transport,
    UnexpectedPduSnafu,
};

/// The user information announced in an association request.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub struct UserInfo {
    /// the maximum length of the PDUs that this node is willing to receive
    pub max_pdu_length: u32,
    pub implementation_class_uid: String,
    pub implementation_version_name: String,
}

impl UserInfo {
    pub fn new(max_pdu_length: u32) -> Self {
        UserInfo {
            max_pdu_length,
            implementation_class_uid: IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: IMPLEMENTATION_VERSION_NAME.to_string(),
        }
    }
}

impl From<UserInfo> for Vec<UserVariableItem> {
    fn from(user_info: UserInfo) -> Self {
        vec![
            UserVariableItem::MaxLength(user_info.max_pdu_length),
            UserVariableItem::ImplementationClassUID(user_info.implementation_class_uid),
            UserVariableItem::ImplementationVersionName(user_info.implementation_version_name),
        ]
    }
}

/// A DICOM association builder for a requesting node.
/// The final outcome is an [`Association`].
///
/// # Example
///
/// ```no_run
/// # use dicom_association::association::AssociationOptions;
/// # fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let mut association = AssociationOptions::new()
///     .calling_ae_title("ECHO-SCU")
///     .called_ae_title("STORE-SCP")
///     .establish("129.168.0.5:104", "1.2.840.10008.1.1")?;
/// association.close()?;
/// # Ok(())
/// # }
/// ```
///
/// By default, the transfer syntaxes
/// _Explicit VR Little Endian_ and _Implicit VR Little Endian_
/// are offered,
/// and any transfer syntax known to the main transfer syntax registry
/// is admitted as the accepted one.
#[derive(Debug, Clone)]
pub struct AssociationOptions<'a> {
    /// the calling AE title
    calling_ae_title: Cow<'a, str>,
    /// the called AE title
    called_ae_title: Cow<'a, str>,
    /// the requested application context name
    application_context_name: Cow<'a, str>,
    /// the transfer syntaxes offered in the presentation context
    transfer_syntaxes: Vec<Cow<'a, str>>,
    /// the transfer syntaxes admitted as the accepted one,
    /// or `None` to delegate to the transfer syntax registry
    supported_transfer_syntaxes: Option<Vec<Cow<'a, str>>>,
    /// the expected protocol version
    protocol_version: u16,
    /// the maximum PDU length requested for receiving PDUs
    max_pdu_length: u32,
    /// whether to receive PDUs in strict mode
    strict: bool,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    /// the source of presentation context identifiers
    context_ids: Option<Arc<ContextIdAllocator>>,
}

impl<'a> Default for AssociationOptions<'a> {
    fn default() -> Self {
        AssociationOptions {
            calling_ae_title: "THIS-SCU".into(),
            called_ae_title: "ANY-SCP".into(),
            application_context_name: DICOM_APPLICATION_CONTEXT_NAME.into(),
            transfer_syntaxes: vec!["1.2.840.10008.1.2.1".into(), "1.2.840.10008.1.2".into()],
            supported_transfer_syntaxes: None,
            protocol_version: 1,
            max_pdu_length: DEFAULT_MAX_PDU,
            strict: true,
            read_timeout: None,
            write_timeout: None,
            context_ids: None,
        }
    }
}

impl<'a> AssociationOptions<'a> {
    /// Create a new set of options for establishing an association.
    pub fn new() -> Self {
        Self::default()
    }

    /// Define the calling application entity title for the association,
    /// which refers to this DICOM node.
    ///
    /// The default is `THIS-SCU`.
    pub fn calling_ae_title<T>(mut self, calling_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.calling_ae_title = calling_ae_title.into();
        self
    }

    /// Define the called application entity title for the association,
    /// which refers to the target DICOM node.
    ///
    /// The default is `ANY-SCP`.
    /// Passing an empty string resets the AE title to the default.
    pub fn called_ae_title<T>(mut self, called_ae_title: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        let cae = called_ae_title.into();
        self.called_ae_title = if cae.is_empty() { "ANY-SCP".into() } else { cae };
        self
    }

    pub fn application_context_name<T>(mut self, application_context_name: T) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.application_context_name = application_context_name.into();
        self
    }

    /// Replace the list of transfer syntaxes
    /// offered in the proposed presentation context.
    pub fn transfer_syntaxes<T>(mut self, transfer_syntax_uids: Vec<T>) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.transfer_syntaxes = transfer_syntax_uids
            .into_iter()
            .map(|t| trim_uid(t.into()))
            .collect();
        self
    }

    /// Restrict the transfer syntaxes admitted
    /// as the one accepted by the remote node.
    ///
    /// Without this option,
    /// any transfer syntax supported by the main transfer syntax registry
    /// is admitted.
    pub fn supported_transfer_syntaxes<T>(mut self, transfer_syntax_uids: Vec<T>) -> Self
    where
        T: Into<Cow<'a, str>>,
    {
        self.supported_transfer_syntaxes = Some(
            transfer_syntax_uids
                .into_iter()
                .map(|t| trim_uid(t.into()))
                .collect(),
        );
        self
    }

    /// Override the maximum PDU length
    /// that this application entity will admit.
    pub fn max_pdu_length(mut self, value: u32) -> Self {
        self.max_pdu_length = value;
        self
    }

    /// Override strict mode:
    /// whether receiving PDUs must not
    /// surpass the negotiated maximum PDU length.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Bound the time spent blocked on reading from the TCP stream.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Bound the time spent blocked on writing to the TCP stream.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Use the given allocator for presentation context identifiers
    /// instead of the process-wide one.
    pub fn context_id_allocator(mut self, allocator: Arc<ContextIdAllocator>) -> Self {
        self.context_ids = Some(allocator);
        self
    }

    /// Initiate the TCP connection to the given address
    /// and request a new DICOM association
    /// for the given abstract syntax.
    pub fn establish<A: ToSocketAddrs>(
        self,
        address: A,
        abstract_syntax: &str,
    ) -> Result<Association<TcpStream>> {
        let read_timeout = self.read_timeout;
        let write_timeout = self.write_timeout;
        ensure!(self.max_pdu_length > 0, InvalidMaxPduSnafu);

        let socket = TcpStream::connect(address).context(ConnectSnafu)?;
        socket
            .set_read_timeout(read_timeout)
            .context(ConfigureSocketSnafu)?;
        socket
            .set_write_timeout(write_timeout)
            .context(ConfigureSocketSnafu)?;

        let mut association = self.open(socket)?;
        association.request(abstract_syntax)?;
        Ok(association)
    }

    /// Wrap an already connected transport
    /// in an association which is yet to be requested.
    pub fn open<S: Transport>(self, socket: S) -> Result<Association<S>> {
        let AssociationOptions {
            calling_ae_title,
            called_ae_title,
            application_context_name,
            transfer_syntaxes,
            supported_transfer_syntaxes,
            protocol_version,
            max_pdu_length,
            strict,
            read_timeout: _,
            write_timeout: _,
            context_ids,
        } = self;

        ensure!(max_pdu_length > 0, InvalidMaxPduSnafu);

        Ok(Association {
            socket,
            framer: PduFramer::new(MAXIMUM_PDU_SIZE).strict(strict),
            buffer: Vec::with_capacity(max_pdu_length as usize),
            state: AssociationState::Idle,
            calling_ae_title: calling_ae_title.into_owned(),
            called_ae_title: called_ae_title.into_owned(),
            application_context_name: application_context_name.into_owned(),
            transfer_syntaxes: transfer_syntaxes.into_iter().map(Cow::into_owned).collect(),
            supported_transfer_syntaxes: supported_transfer_syntaxes
                .map(|list| list.into_iter().map(Cow::into_owned).collect()),
            protocol_version,
            max_pdu_length,
            strict,
            context_ids: context_ids.unwrap_or_else(ContextIdAllocator::global),
            presentation_context_id: None,
            accepted: false,
            abstract_syntax: None,
            transfer_syntax: None,
            remote_max_pdu_length: DEFAULT_MAX_PDU,
            remote_implementation_class_uid: None,
            remote_implementation_version_name: None,
        })
    }
}

/// A DICOM upper level association from the perspective
/// of a requesting application entity.
///
/// The association starts [idle](AssociationState::Idle),
/// becomes established through [`request`](Self::request),
/// carries exchanges through [`exchange`](Self::exchange)
/// and [`write`](Self::write),
/// and ends with either [`close`](Self::close) or [`abort`](Self::abort).
///
/// When the value falls out of scope while still established,
/// the program will automatically try to gracefully release the association
/// then shut down the underlying connection.
#[derive(Debug)]
pub struct Association<S: Transport> {
    socket: S,
    /// reassembler of incoming PDUs,
    /// kept across exchanges
    framer: PduFramer,
    /// buffer to assemble PDUs before sending them on wire
    buffer: Vec<u8>,
    state: AssociationState,
    calling_ae_title: String,
    called_ae_title: String,
    application_context_name: String,
    /// transfer syntaxes offered on request
    transfer_syntaxes: Vec<String>,
    supported_transfer_syntaxes: Option<Vec<String>>,
    protocol_version: u16,
    /// the maximum PDU length that this application entity is expecting to receive
    max_pdu_length: u32,
    strict: bool,
    context_ids: Arc<ContextIdAllocator>,
    presentation_context_id: Option<u8>,
    accepted: bool,
    abstract_syntax: Option<String>,
    transfer_syntax: Option<String>,
    /// the maximum PDU length that the remote application entity accepts
    remote_max_pdu_length: u32,
    remote_implementation_class_uid: Option<String>,
    remote_implementation_version_name: Option<String>,
}

impl<S: Transport> Association<S> {
    pub fn state(&self) -> AssociationState {
        self.state
    }

    /// Whether an A-ASSOCIATE-AC was received and admitted.
    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn calling_ae_title(&self) -> &str {
        &self.calling_ae_title
    }

    pub fn called_ae_title(&self) -> &str {
        &self.called_ae_title
    }

    /// The identifier of the presentation context last requested.
    pub fn presentation_context_id(&self) -> Option<u8> {
        self.presentation_context_id
    }

    /// The abstract syntax of the accepted presentation context.
    pub fn abstract_syntax(&self) -> Option<&str> {
        self.abstract_syntax.as_deref()
    }

    /// The transfer syntax accepted by the remote node.
    pub fn transfer_syntax(&self) -> Option<&str> {
        self.transfer_syntax.as_deref()
    }

    pub fn protocol_version(&self) -> u16 {
        self.protocol_version
    }

    /// Retrieve the maximum PDU length
    /// that this application entity is expecting to receive.
    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    /// Retrieve the maximum PDU length
    /// admitted by the association acceptor.
    pub fn remote_max_pdu_length(&self) -> u32 {
        self.remote_max_pdu_length
    }

    pub fn remote_implementation_class_uid(&self) -> Option<&str> {
        self.remote_implementation_class_uid.as_deref()
    }

    pub fn remote_implementation_version_name(&self) -> Option<&str> {
        self.remote_implementation_version_name.as_deref()
    }

    /// Bytes received from the remote node
    /// which were not yet consumed by any exchange.
    pub fn pending_bytes(&self) -> &[u8] {
        self.framer.pending()
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &S {
        &self.socket
    }

    /// Request the association,
    /// proposing a single presentation context
    /// with the given abstract syntax.
    ///
    /// On success, the association becomes established
    /// and the acknowledgement of the remote node is returned.
    pub fn request(&mut self, abstract_syntax: &str) -> Result<AssociationAC> {
        ensure!(
            self.state == AssociationState::Idle,
            InvalidStateSnafu {
                operation: "request association",
                state: self.state,
            }
        );

        let id = self.context_ids.next_context_id();
        let abstract_syntax = trim_uid(Cow::Borrowed(abstract_syntax)).into_owned();
        let presentation_context = PresentationContextProposed {
            id,
            abstract_syntax: abstract_syntax.clone(),
            transfer_syntaxes: self.transfer_syntaxes.clone(),
        };
        let mut message = AssociateRequest::new(AssociationRQ {
            protocol_version: self.protocol_version,
            calling_ae_title: self.calling_ae_title.clone(),
            called_ae_title: self.called_ae_title.clone(),
            application_context_name: self.application_context_name.clone(),
            presentation_contexts: vec![presentation_context],
            user_variables: UserInfo::new(self.max_pdu_length).into(),
        });

        // the state remains idle if the request cannot be built
        let pdu = message.pdu().context(BuildMessageSnafu)?;
        self.buffer.clear();
        write_pdu(&mut self.buffer, &pdu).context(EncodeSnafu)?;

        self.presentation_context_id = Some(id);
        self.state = AssociationState::Requesting;
        debug!(
            "Requesting association {} -> {} (context {}, {})",
            self.calling_ae_title, self.called_ae_title, id, abstract_syntax
        );

        if let Err(e) = self.socket.write_all(&self.buffer).context(SendSnafu) {
            return Err(self.fail_request(e));
        }

        // the acceptor's maximum is not known yet
        self.framer.set_max_pdu_length(MAXIMUM_PDU_SIZE);
        let ac = match dispatch(&mut self.framer, &mut self.socket, &mut message, self.strict) {
            Ok(Response { message: ac, .. }) => ac,
            Err(e) => return Err(self.fail_request(e)),
        };

        if let Err(e) = self.admit(&ac, id, abstract_syntax) {
            return Err(self.fail_request(e));
        }
        Ok(ac)
    }

    /// Check the acknowledgement and record the negotiated parameters.
    fn admit(&mut self, ac: &AssociationAC, id: u8, abstract_syntax: String) -> Result<()> {
        ensure!(
            ac.protocol_version == self.protocol_version,
            ProtocolVersionMismatchSnafu {
                expected: self.protocol_version,
                got: ac.protocol_version,
            }
        );

        let accepted = ac
            .presentation_contexts
            .iter()
            .find(|pc| pc.id == id && pc.reason == PresentationContextResultReason::Acceptance);
        let accepted = match accepted {
            Some(pc) => pc,
            None => return NoAcceptedPresentationContextsSnafu.fail(),
        };

        let transfer_syntax = trim_uid(Cow::Borrowed(accepted.transfer_syntax.as_str()));
        ensure!(
            self.is_transfer_syntax_supported(&transfer_syntax),
            TransferSyntaxNotSupportedSnafu {
                transfer_syntax: transfer_syntax.to_string(),
            }
        );

        // treat 0 as the maximum size admitted by the standard
        let remote_max_pdu_length = match ac.max_pdu_length() {
            Some(0) => MAXIMUM_PDU_SIZE,
            Some(len) => len,
            None => DEFAULT_MAX_PDU,
        };

        self.transfer_syntax = Some(transfer_syntax.into_owned());
        self.abstract_syntax = Some(abstract_syntax);
        self.remote_max_pdu_length = remote_max_pdu_length;
        self.remote_implementation_class_uid = ac.implementation_class_uid().map(String::from);
        self.remote_implementation_version_name =
            ac.implementation_version_name().map(String::from);
        self.framer.set_max_pdu_length(self.max_pdu_length);
        self.accepted = true;
        self.state = AssociationState::Established;
        debug!(
            "Association established (transfer syntax {}, remote max PDU length {})",
            self.transfer_syntax.as_deref().unwrap_or_default(),
            remote_max_pdu_length
        );
        Ok(())
    }

    fn is_transfer_syntax_supported(&self, transfer_syntax: &str) -> bool {
        match &self.supported_transfer_syntaxes {
            Some(supported) => is_supported_in(supported, transfer_syntax),
            None => is_supported(transfer_syntax),
        }
    }

    /// Bring the association to a terminal state after a failed request.
    fn fail_request(&mut self, error: Error) -> Error {
        let peer_gone = matches!(
            error,
            Error::HandleResponse {
                source: ResponseError::Aborted { .. } | ResponseError::Rejected { .. },
            }
        );
        match error.kind() {
            ErrorKind::Transport => {
                self.state = AssociationState::Closed;
            }
            ErrorKind::Framing if matches!(error, Error::Receive { .. }) => {
                self.state = AssociationState::Closed;
            }
            _ if peer_gone => {
                self.state = if error.rejection().is_some() {
                    AssociationState::Closed
                } else {
                    AssociationState::Aborted
                };
            }
            _ => {
                // abort connection
                let _ = self.send_pdu(&Pdu::AbortRQ {
                    source: AbortRQSource::ServiceUser,
                });
                self.state = AssociationState::Aborted;
            }
        }
        let _ = self.socket.shutdown();
        warn!("Association request failed: {}", error);
        error
    }

    /// Send a message to the remote node,
    /// then, if `read_response` is true,
    /// read the responses to it until a final status is obtained.
    ///
    /// The association must be established.
    pub fn write<M>(
        &mut self,
        message: &mut M,
        read_response: bool,
    ) -> Result<Option<Response<M::Response>>>
    where
        M: Message + ?Sized,
    {
        if read_response {
            self.exchange(message).map(Some)
        } else {
            self.ensure_established("send message")?;
            self.send_message(message)?;
            Ok(None)
        }
    }

    /// Send a message to the remote node
    /// and read the responses to it until a final status is obtained.
    ///
    /// Malformed or unexpected data from the remote node
    /// aborts the association.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use dicom_association::association::{AssociationOptions, DimseMessage};
    /// # fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// # let mut association = AssociationOptions::new()
    /// #     .establish("129.168.0.5:104", "1.2.840.10008.1.1")?;
    /// let pc_id = association.presentation_context_id().unwrap_or(1);
    /// let mut echo = DimseMessage::echo(pc_id, 1);
    /// let response = association.exchange(&mut echo)?;
    /// println!("C-ECHO: {}", response.status);
    /// # Ok(())
    /// # }
    /// ```
    pub fn exchange<M>(&mut self, message: &mut M) -> Result<Response<M::Response>>
    where
        M: Message + ?Sized,
    {
        self.ensure_established("exchange message")?;
        self.send_message(message)?;
        dispatch(&mut self.framer, &mut self.socket, message, self.strict)
            .map_err(|e| self.settle_after(e))
    }

    fn ensure_established(&self, operation: &'static str) -> Result<()> {
        ensure!(
            self.state == AssociationState::Established,
            InvalidStateSnafu {
                operation,
                state: self.state,
            }
        );
        Ok(())
    }

    /// Write the PDUs of a message.
    ///
    /// All of them are encoded and checked against the remote maximum length
    /// before anything is written.
    fn send_message<M>(&mut self, message: &M) -> Result<()>
    where
        M: Message + ?Sized,
    {
        let pdu = message.pdu().context(BuildMessageSnafu)?;
        let data_pdu = message.data_pdu();

        self.buffer.clear();
        self.encode_pdu(&pdu, true)?;
        if let Some(data_pdu) = &data_pdu {
            self.encode_pdu(data_pdu, true)?;
        }
        self.socket
            .write_all(&self.buffer)
            .context(SendSnafu)
            .map_err(|e| self.settle_after(e))?;

        debug!(">> {}", pdu.short_description());
        if let Some(data_pdu) = &data_pdu {
            debug!(">> {}", data_pdu.short_description());
        }
        Ok(())
    }

    /// Encode and write a single PDU.
    fn send_pdu(&mut self, pdu: &Pdu) -> Result<()> {
        self.buffer.clear();
        self.encode_pdu(pdu, false)?;
        self.socket.write_all(&self.buffer).context(SendSnafu)
    }

    /// Append the encoded PDU to the output buffer,
    /// optionally checking it against the remote maximum length.
    fn encode_pdu(&mut self, pdu: &Pdu, check_length: bool) -> Result<()> {
        let start = self.buffer.len();
        write_pdu(&mut self.buffer, pdu).context(EncodeSnafu)?;
        if check_length {
            let length = self.buffer.len() - start - PDU_HEADER_SIZE as usize;
            ensure!(
                length <= self.remote_max_pdu_length as usize,
                SendTooLongPduSnafu {
                    length,
                    max_pdu_length: self.remote_max_pdu_length,
                }
            );
        }
        Ok(())
    }

    /// Update the association state after a failed exchange.
    fn settle_after(&mut self, error: Error) -> Error {
        let peer_aborted = matches!(
            error,
            Error::HandleResponse {
                source: ResponseError::Aborted { .. },
            }
        );
        if peer_aborted {
            self.state = AssociationState::Aborted;
            let _ = self.socket.shutdown();
            return error;
        }
        match error.kind() {
            ErrorKind::Transport => {
                self.state = AssociationState::Closed;
                let _ = self.socket.shutdown();
            }
            ErrorKind::Framing => {
                // nothing else received on this connection can be trusted
                let discarded = self.framer.discard();
                warn!(
                    "Aborting association after a framing error ({} bytes discarded): {}",
                    discarded, error
                );
                let _ = self.send_pdu(&Pdu::AbortRQ {
                    source: AbortRQSource::ServiceUser,
                });
                self.state = AssociationState::Aborted;
                let _ = self.socket.shutdown();
            }
            _ => {}
        }
        error
    }

    /// Gracefully release the association
    /// through an A-RELEASE exchange,
    /// then shut down the underlying connection.
    ///
    /// This is a no-op unless the association is established.
    /// Once this returns, the association is closed,
    /// even if the remote node did not acknowledge the release.
    pub fn close(&mut self) -> Result<()> {
        if self.state != AssociationState::Established {
            return Ok(());
        }
        if !self.socket.is_connected() {
            warn!("Connection already lost, association closed without release");
            self.state = AssociationState::Closed;
            return Ok(());
        }

        self.state = AssociationState::Closing;
        let result = self.release_impl();
        self.state = AssociationState::Closed;
        let _ = self.socket.shutdown();
        if let Err(e) = &result {
            warn!("Association release failed: {}", e);
        }
        result
    }

    fn release_impl(&mut self) -> Result<()> {
        self.send_pdu(&Pdu::ReleaseRQ)?;
        let frame = self
            .framer
            .next_frame(&mut self.socket)
            .context(ReceiveSnafu)?;
        let pdu = read_pdu(&mut &frame[..], self.max_pdu_length, self.strict)
            .context(DecodeSnafu)?;
        match pdu {
            Pdu::ReleaseRP => Ok(()),
            pdu => UnexpectedPduSnafu { pdu: Box::new(pdu) }.fail(),
        }
    }

    /// Send an abort message to the remote node
    /// and shut down the underlying connection.
    ///
    /// Valid in any state but the terminal ones.
    /// Once this returns, the association is aborted.
    pub fn abort(&mut self) -> Result<()> {
        ensure!(
            !self.state.is_terminal(),
            InvalidStateSnafu {
                operation: "abort",
                state: self.state,
            }
        );

        let result = self.abort_impl();
        self.state = AssociationState::Aborted;
        let _ = self.socket.shutdown();
        if let Err(e) = &result {
            warn!("Association abort failed: {}", e);
        }
        result
    }

    fn abort_impl(&mut self) -> Result<()> {
        self.send_pdu(&Pdu::AbortRQ {
            source: AbortRQSource::ServiceUser,
        })?;
        match self.framer.next_frame(&mut self.socket) {
            Ok(frame) => {
                debug!("Received {} bytes after abort", frame.len());
                Ok(())
            }
            // the remote node is expected to close the connection
            Err(e) if e.is_transport() => Ok(()),
            Err(e) => Err(e).context(ReceiveSnafu),
        }
    }
}

impl<S: Transport> Drop for Association<S> {
    fn drop(&mut self) {
        if self.state == AssociationState::Established {
            let _ = self.close();
        }
    }
}
