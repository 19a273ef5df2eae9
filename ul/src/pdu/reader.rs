//! PDU decoding module
//!
//! [`read_pdu`] decodes exactly one PDU from a data source,
//! header included.
//! When the source is a network stream,
//! prefer obtaining complete PDUs from a [`PduFramer`](super::PduFramer)
//! and decoding each frame in memory.
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ReadBytesExt};
use dicom_encoding::text::{DecodeTextError, DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, OptionExt, ResultExt, Snafu};
use std::io::{Cursor, ErrorKind, Read, Seek, SeekFrom};

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("No PDU available"))]
    NoPduAvailable { backtrace: Backtrace },

    #[snafu(display("Could not read PDU"))]
    ReadPdu {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU item"))]
    ReadPduItem {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Could not read PDU field `{}`", field))]
    ReadPduField {
        field: &'static str,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Invalid item length {} (must be >=2)", length))]
    InvalidItemLength { length: u32, backtrace: Backtrace },

    #[snafu(display("Could not read {} reserved bytes", bytes))]
    ReadReserved {
        bytes: u32,
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Incoming pdu was too large: length {}, maximum is {}",
        pdu_length,
        max_pdu_length
    ))]
    PduTooLarge {
        pdu_length: u32,
        max_pdu_length: u32,
        backtrace: Backtrace,
    },

    #[snafu(display("PDU contained an invalid value {:?}", var_item))]
    InvalidPduVariable {
        var_item: PduVariableItem,
        backtrace: Backtrace,
    },

    #[snafu(display("Multiple transfer syntaxes were accepted"))]
    MultipleTransferSyntaxesAccepted { backtrace: Backtrace },

    #[snafu(display("Invalid reject source or reason"))]
    InvalidRejectSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid abort service provider"))]
    InvalidAbortSourceOrReason { backtrace: Backtrace },

    #[snafu(display("Invalid presentation context result reason"))]
    InvalidPresentationContextResultReason { backtrace: Backtrace },

    #[snafu(display("invalid transfer syntax sub-item"))]
    InvalidTransferSyntaxSubItem { backtrace: Backtrace },

    #[snafu(display("unknown presentation context sub-item"))]
    UnknownPresentationContextSubItem { backtrace: Backtrace },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        source: DecodeTextError,
        backtrace: Backtrace,
    },

    #[snafu(display("Missing application context name"))]
    MissingApplicationContextName { backtrace: Backtrace },

    #[snafu(display("Missing abstract syntax"))]
    MissingAbstractSyntax { backtrace: Backtrace },

    #[snafu(display("Missing transfer syntax"))]
    MissingTransferSyntax { backtrace: Backtrace },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Read and decode one PDU from the given source.
///
/// In strict mode,
/// a PDU with a length greater than `max_pdu_length` is refused.
/// Otherwise, only PDUs larger than [`MAXIMUM_PDU_SIZE`] are refused.
pub fn read_pdu<R>(reader: &mut R, max_pdu_length: u32, strict: bool) -> Result<Pdu>
where
    R: Read,
{
    // Failing to read the first 2 bytes means that there is no PDU at all,
    // which is distinguished from a PDU cut short.
    let mut bytes = [0; 2];
    if let Err(e) = reader.read_exact(&mut bytes) {
        ensure!(e.kind() != ErrorKind::UnexpectedEof, NoPduAvailableSnafu);
        return Err(e).context(ReadPduFieldSnafu { field: "type" });
    }

    let pdu_type = bytes[0];
    let pdu_length = reader
        .read_u32::<BigEndian>()
        .context(ReadPduFieldSnafu { field: "length" })?;

    if strict {
        ensure!(
            pdu_length <= max_pdu_length,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length
            }
        );
    } else if pdu_length > max_pdu_length {
        ensure!(
            pdu_length <= MAXIMUM_PDU_SIZE,
            PduTooLargeSnafu {
                pdu_length,
                max_pdu_length: MAXIMUM_PDU_SIZE
            }
        );
        tracing::warn!(
            "Incoming pdu was too large: length {}, maximum is {}",
            pdu_length,
            max_pdu_length
        );
    }

    let bytes = read_n(reader, pdu_length as usize).context(ReadPduSnafu)?;
    let mut cursor = Cursor::new(bytes);
    let codec = DefaultCharacterSetCodec;

    match pdu_type {
        0x01 => {
            // A-ASSOCIATE-RQ PDU Structure
            let (protocol_version, called_ae_title, calling_ae_title) =
                read_association_fixed_fields(&mut cursor, &codec)?;

            // 75-xxx - Variable items: one Application Context Item,
            // one or more Presentation Context Items and one User Information Item.
            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextProposed(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationRQ(AssociationRQ {
                protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title,
                calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        0x02 => {
            // A-ASSOCIATE-AC PDU Structure
            //
            // The AE title fields are reserved here:
            // sent back with the values of the A-ASSOCIATE-RQ,
            // but not tested when received.
            let (protocol_version, called_ae_title, calling_ae_title) =
                read_association_fixed_fields(&mut cursor, &codec)?;

            let mut application_context_name = None;
            let mut presentation_contexts = vec![];
            let mut user_variables = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                match read_pdu_variable(&mut cursor, &codec)? {
                    PduVariableItem::ApplicationContext(val) => {
                        application_context_name = Some(val);
                    }
                    PduVariableItem::PresentationContextResult(val) => {
                        presentation_contexts.push(val);
                    }
                    PduVariableItem::UserVariables(val) => {
                        user_variables = val;
                    }
                    var_item => {
                        return InvalidPduVariableSnafu { var_item }.fail();
                    }
                }
            }

            Ok(Pdu::AssociationAC(AssociationAC {
                protocol_version,
                application_context_name: application_context_name
                    .context(MissingApplicationContextNameSnafu)?,
                called_ae_title,
                calling_ae_title,
                presentation_contexts,
                user_variables,
            }))
        }
        0x03 => {
            // A-ASSOCIATE-RJ PDU Structure

            // 7 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 8 - Result: 1 - rejected-permanent, 2 - rejected-transient
            let result = AssociationRJResult::from(
                cursor
                    .read_u8()
                    .context(ReadPduFieldSnafu { field: "Result" })?,
            )
            .context(InvalidRejectSourceOrReasonSnafu)?;

            // 9 - Source, 10 - Reason/Diag.
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag.",
            })?;
            let source = AssociationRJSource::from(source, reason)
                .context(InvalidRejectSourceOrReasonSnafu)?;

            Ok(Pdu::AssociationRJ(AssociationRJ { result, source }))
        }
        0x04 => {
            // P-DATA-TF PDU Structure

            // 7-xxx - Presentation-data-value Item(s)
            let mut values = vec![];
            while cursor.position() < cursor.get_ref().len() as u64 {
                // 1-4 - Item-length, counting from the presentation context ID
                // to the last byte of the presentation data value
                let item_length = cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                    field: "Item-Length",
                })?;

                ensure!(
                    item_length >= 2,
                    InvalidItemLengthSnafu {
                        length: item_length
                    }
                );

                // 5 - Presentation-context-ID
                let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Presentation-context-ID",
                })?;

                // 6 - Message Control Header:
                // bit 0 set means command information, unset means data set information;
                // bit 1 set means this is the last fragment.
                let header = cursor.read_u8().context(ReadPduFieldSnafu {
                    field: "Message Control Header",
                })?;

                let value_type = if header & 0x01 > 0 {
                    PDataValueType::Command
                } else {
                    PDataValueType::Data
                };
                let is_last = (header & 0x02) > 0;

                let data =
                    read_n(&mut cursor, (item_length - 2) as usize).context(ReadPduFieldSnafu {
                        field: "Presentation-data-value",
                    })?;

                values.push(PDataValue {
                    presentation_context_id,
                    value_type,
                    is_last,
                    data,
                })
            }

            Ok(Pdu::PData { data: values })
        }
        0x05 | 0x06 => {
            // A-RELEASE-RQ / A-RELEASE-RP PDU Structure

            // 7-10 - Reserved
            cursor
                .seek(SeekFrom::Current(4))
                .context(ReadReservedSnafu { bytes: 4_u32 })?;

            if pdu_type == 0x05 {
                Ok(Pdu::ReleaseRQ)
            } else {
                Ok(Pdu::ReleaseRP)
            }
        }
        0x07 => {
            // A-ABORT PDU Structure

            // 7-8 - Reserved
            let mut buf = [0u8; 2];
            cursor
                .read_exact(&mut buf)
                .context(ReadReservedSnafu { bytes: 2_u32 })?;

            // 9 - Source: 0 - service-user, 1 - reserved, 2 - service-provider
            // 10 - Reason/Diag, only significant for the service-provider
            let source = cursor
                .read_u8()
                .context(ReadPduFieldSnafu { field: "Source" })?;
            let reason = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Reason/Diag",
            })?;
            let source =
                AbortRQSource::from(source, reason).context(InvalidAbortSourceOrReasonSnafu)?;

            Ok(Pdu::AbortRQ { source })
        }
        _ => Ok(Pdu::Unknown {
            pdu_type,
            data: cursor.into_inner(),
        }),
    }
}

fn read_n<R>(reader: &mut R, bytes_to_read: usize) -> std::io::Result<Vec<u8>>
where
    R: Read,
{
    let mut result = Vec::new();
    reader.take(bytes_to_read as u64).read_to_end(&mut result)?;
    Ok(result)
}

/// Read a text field of the given length,
/// trimmed of surrounding spaces.
fn read_text<R>(
    reader: &mut R,
    length: usize,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<String>
where
    R: Read,
{
    let bytes = read_n(reader, length).context(ReadPduFieldSnafu { field })?;
    Ok(codec
        .decode(&bytes)
        .context(DecodeTextSnafu { field })?
        .trim()
        .to_string())
}

/// Read the fixed fields common to A-ASSOCIATE-RQ and A-ASSOCIATE-AC,
/// returning the protocol version, the called AE title
/// and the calling AE title.
fn read_association_fixed_fields(
    cursor: &mut Cursor<Vec<u8>>,
    codec: &dyn TextCodec,
) -> Result<(u16, String, String)> {
    // 7-8 - Protocol-version, version 1 identified with bit 0 set
    let protocol_version = cursor.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Protocol-version",
    })?;

    // 9-10 - Reserved
    cursor
        .read_u16::<BigEndian>()
        .context(ReadReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title, 16 characters padded with spaces
    let called_ae_title = read_text(cursor, 16, codec, "Called-AE-title")?;

    // 27-42 - Calling-AE-title, 16 characters padded with spaces
    let calling_ae_title = read_text(cursor, 16, codec, "Calling-AE-title")?;

    // 43-74 - Reserved
    cursor
        .seek(SeekFrom::Current(32))
        .context(ReadReservedSnafu { bytes: 32_u32 })?;

    Ok((protocol_version, called_ae_title, calling_ae_title))
}

/// Read the type, reserved byte and length of a sub-item.
fn read_sub_item_header<R>(reader: &mut R) -> Result<(u8, u16)>
where
    R: Read,
{
    // 1 - Item-type
    let item_type = reader
        .read_u8()
        .context(ReadPduFieldSnafu { field: "Item-type" })?;

    // 2 - Reserved
    reader
        .read_u8()
        .context(ReadReservedSnafu { bytes: 1_u32 })?;

    // 3-4 - Item-length
    let item_length = reader.read_u16::<BigEndian>().context(ReadPduFieldSnafu {
        field: "Item-length",
    })?;

    Ok((item_type, item_length))
}

fn read_pdu_variable<R>(reader: &mut R, codec: &dyn TextCodec) -> Result<PduVariableItem>
where
    R: Read,
{
    let (item_type, item_length) = read_sub_item_header(reader)?;

    let bytes = read_n(reader, item_length as usize).context(ReadPduItemSnafu)?;
    let length = bytes.len() as u64;
    let mut cursor = Cursor::new(bytes);

    match item_type {
        0x10 => {
            // Application Context Item Structure
            let val = codec
                .decode(cursor.get_ref())
                .context(DecodeTextSnafu {
                    field: "Application-context-name",
                })?;
            Ok(PduVariableItem::ApplicationContext(val.trim().to_string()))
        }
        0x20 => {
            // Presentation Context Item Structure (proposed)

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6-8 - Reserved
            cursor
                .seek(SeekFrom::Current(3))
                .context(ReadReservedSnafu { bytes: 3_u32 })?;

            // 9-xxx - one Abstract Syntax and one or more Transfer Syntax sub-items
            let mut abstract_syntax = None;
            let mut transfer_syntaxes = vec![];
            while cursor.position() < length {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                match item_type {
                    0x30 => {
                        abstract_syntax = Some(read_text(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Abstract-syntax-name",
                        )?);
                    }
                    0x40 => {
                        transfer_syntaxes.push(read_text(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Transfer-syntax-name",
                        )?);
                    }
                    _ => {
                        return UnknownPresentationContextSubItemSnafu.fail();
                    }
                }
            }

            Ok(PduVariableItem::PresentationContextProposed(
                PresentationContextProposed {
                    id: presentation_context_id,
                    abstract_syntax: abstract_syntax.context(MissingAbstractSyntaxSnafu)?,
                    transfer_syntaxes,
                },
            ))
        }
        0x21 => {
            // Presentation Context Item Structure (result)

            // 5 - Presentation-context-ID
            let presentation_context_id = cursor.read_u8().context(ReadPduFieldSnafu {
                field: "Presentation-context-ID",
            })?;

            // 6 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 7 - Result/Reason
            let reason = PresentationContextResultReason::from(cursor.read_u8().context(
                ReadPduFieldSnafu {
                    field: "Result/Reason",
                },
            )?)
            .context(InvalidPresentationContextResultReasonSnafu)?;

            // 8 - Reserved
            cursor
                .read_u8()
                .context(ReadReservedSnafu { bytes: 1_u32 })?;

            // 9-xxx - exactly one Transfer Syntax sub-item,
            // not significant unless the context was accepted
            let mut transfer_syntax: Option<String> = None;
            while cursor.position() < length {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                ensure!(item_type == 0x40, InvalidTransferSyntaxSubItemSnafu);
                ensure!(
                    transfer_syntax.is_none(),
                    MultipleTransferSyntaxesAcceptedSnafu
                );
                transfer_syntax = Some(read_text(
                    &mut cursor,
                    item_length as usize,
                    codec,
                    "Transfer-syntax-name",
                )?);
            }

            Ok(PduVariableItem::PresentationContextResult(
                PresentationContextResult {
                    id: presentation_context_id,
                    reason,
                    transfer_syntax: transfer_syntax.context(MissingTransferSyntaxSnafu)?,
                },
            ))
        }
        0x50 => {
            // User Information Item Structure
            let mut user_variables = vec![];
            while cursor.position() < length {
                let (item_type, item_length) = read_sub_item_header(&mut cursor)?;
                match item_type {
                    0x51 => {
                        // Maximum Length Sub-Item: 0 means no maximum length specified
                        user_variables.push(UserVariableItem::MaxLength(
                            cursor.read_u32::<BigEndian>().context(ReadPduFieldSnafu {
                                field: "Maximum-length-received",
                            })?,
                        ));
                    }
                    0x52 => {
                        user_variables.push(UserVariableItem::ImplementationClassUID(read_text(
                            &mut cursor,
                            item_length as usize,
                            codec,
                            "Implementation-class-uid",
                        )?));
                    }
                    0x55 => {
                        user_variables.push(UserVariableItem::ImplementationVersionName(
                            read_text(
                                &mut cursor,
                                item_length as usize,
                                codec,
                                "Implementation-version-name",
                            )?,
                        ));
                    }
                    _ => {
                        // kept verbatim, negotiation of these is not supported
                        user_variables.push(UserVariableItem::Unknown(
                            item_type,
                            read_n(&mut cursor, item_length as usize)
                                .context(ReadPduFieldSnafu { field: "Unknown" })?,
                        ));
                    }
                }
            }

            Ok(PduVariableItem::UserVariables(user_variables))
        }
        _ => Ok(PduVariableItem::Unknown(item_type)),
    }
}
