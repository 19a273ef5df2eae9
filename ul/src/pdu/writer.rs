//! PDU encoding module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, WriteBytesExt};
use dicom_encoding::text::{DefaultCharacterSetCodec, EncodeTextError, TextCodec};
use snafu::{Backtrace, ResultExt, Snafu};
use std::io::Write;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display("Could not write chunk of {} PDU structure", name))]
    WriteChunk {
        /// the name of the PDU structure
        name: &'static str,
        source: WriteChunkError,
    },

    #[snafu(display("Could not write field `{}`", field))]
    WriteField {
        field: &'static str,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not write {} reserved bytes", bytes))]
    WriteReserved {
        bytes: u32,
        backtrace: Backtrace,
        source: std::io::Error,
    },

    #[snafu(display("Could not encode field `{}`", field))]
    EncodeField {
        field: &'static str,
        backtrace: Backtrace,
        source: EncodeTextError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum WriteChunkError {
    #[snafu(display("Failed to build chunk"))]
    BuildChunk {
        backtrace: Backtrace,
        source: Box<Error>,
    },
    #[snafu(display("Failed to write chunk length"))]
    WriteLength {
        backtrace: Backtrace,
        source: std::io::Error,
    },
    #[snafu(display("Failed to write chunk data"))]
    WriteData {
        backtrace: Backtrace,
        source: std::io::Error,
    },
}

fn write_chunk_u32<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = data.len() as u32;
    writer
        .write_u32::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

fn write_chunk_u16<F>(writer: &mut dyn Write, func: F) -> std::result::Result<(), WriteChunkError>
where
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    let mut data = vec![];
    func(&mut data).map_err(Box::from).context(BuildChunkSnafu)?;

    let length = data.len() as u16;
    writer
        .write_u16::<BigEndian>(length)
        .context(WriteLengthSnafu)?;

    writer.write_all(&data).context(WriteDataSnafu)?;

    Ok(())
}

/// Write the PDU type and the reserved byte which follows it.
fn write_pdu_type(writer: &mut dyn Write, pdu_type: u8) -> Result<()> {
    writer
        .write_u8(pdu_type)
        .context(WriteFieldSnafu { field: "PDU-type" })?;
    writer
        .write_u8(0x00)
        .context(WriteReservedSnafu { bytes: 1_u32 })
}

/// Write a sub-item holding a single text value,
/// such as a UID.
fn write_text_item(
    writer: &mut dyn Write,
    item_type: u8,
    value: &str,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<()> {
    write_pdu_type(writer, item_type)?;
    write_chunk_u16(writer, |writer| {
        let bytes = codec.encode(value).context(EncodeFieldSnafu { field })?;
        writer
            .write_all(&bytes)
            .context(WriteFieldSnafu { field })
    })
    .context(WriteChunkSnafu { name: field })
}

/// Write an AE title, padded with spaces to 16 characters.
fn write_ae_title(
    writer: &mut dyn Write,
    ae_title: &str,
    codec: &dyn TextCodec,
    field: &'static str,
) -> Result<()> {
    let mut ae_title_bytes = codec.encode(ae_title).context(EncodeFieldSnafu { field })?;
    ae_title_bytes.resize(16, b' ');
    writer
        .write_all(&ae_title_bytes)
        .context(WriteFieldSnafu { field })
}

/// Encode a PDU and write it to the given destination,
/// header included.
pub fn write_pdu<W>(writer: &mut W, pdu: &Pdu) -> Result<()>
where
    W: Write,
{
    let codec = DefaultCharacterSetCodec;
    match pdu {
        Pdu::AssociationRQ(AssociationRQ {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_pdu_type(writer, PduType::AssociationRQ.code())?;

            write_chunk_u32(writer, |writer| {
                write_association_fixed_fields(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                    &codec,
                )?;

                // 75-xxx - Variable items
                write_text_item(
                    writer,
                    0x10,
                    application_context_name,
                    &codec,
                    "Application-context-name",
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_proposed(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RQ",
            })
        }
        Pdu::AssociationAC(AssociationAC {
            protocol_version,
            calling_ae_title,
            called_ae_title,
            application_context_name,
            presentation_contexts,
            user_variables,
        }) => {
            write_pdu_type(writer, PduType::AssociationAC.code())?;

            write_chunk_u32(writer, |writer| {
                // AE titles are sent back as received in the A-ASSOCIATE-RQ
                write_association_fixed_fields(
                    writer,
                    *protocol_version,
                    called_ae_title,
                    calling_ae_title,
                    &codec,
                )?;

                write_text_item(
                    writer,
                    0x10,
                    application_context_name,
                    &codec,
                    "Application-context-name",
                )?;

                for presentation_context in presentation_contexts {
                    write_pdu_variable_presentation_context_result(
                        writer,
                        presentation_context,
                        &codec,
                    )?;
                }

                write_pdu_variable_user_variables(writer, user_variables, &codec)
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-AC",
            })
        }
        Pdu::AssociationRJ(AssociationRJ { result, source }) => {
            write_pdu_type(writer, PduType::AssociationRJ.code())?;

            write_chunk_u32(writer, |writer| {
                // 7 - Reserved
                writer
                    .write_u8(0x00)
                    .context(WriteReservedSnafu { bytes: 1_u32 })?;

                // 8 - Result
                let result = match result {
                    AssociationRJResult::Permanent => 0x01,
                    AssociationRJResult::Transient => 0x02,
                };
                writer
                    .write_u8(result)
                    .context(WriteFieldSnafu { field: "Result" })?;

                // 9 - Source, 10 - Reason/Diag.
                let (source, reason) = source.to_codes();
                writer
                    .write_u8(source)
                    .context(WriteFieldSnafu { field: "Source" })?;
                writer.write_u8(reason).context(WriteFieldSnafu {
                    field: "Reason/Diag.",
                })
            })
            .context(WriteChunkSnafu {
                name: "A-ASSOCIATE-RJ",
            })
        }
        Pdu::PData { data } => {
            write_pdu_type(writer, PduType::PData.code())?;

            write_chunk_u32(writer, |writer| {
                for presentation_data_value in data {
                    write_chunk_u32(writer, |writer| {
                        writer
                            .write_u8(presentation_data_value.presentation_context_id)
                            .context(WriteFieldSnafu {
                                field: "Presentation-context-ID",
                            })?;

                        // message control header:
                        // bit 0 for command information, bit 1 for the last fragment
                        let mut message_header = 0x00;
                        if let PDataValueType::Command = presentation_data_value.value_type {
                            message_header |= 0x01;
                        }
                        if presentation_data_value.is_last {
                            message_header |= 0x02;
                        }
                        writer.write_u8(message_header).context(WriteFieldSnafu {
                            field: "Presentation-data-value control header",
                        })?;

                        writer
                            .write_all(&presentation_data_value.data)
                            .context(WriteFieldSnafu {
                                field: "Presentation-data-value",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Presentation-data-value item",
                    })?;
                }

                Ok(())
            })
            .context(WriteChunkSnafu { name: "P-DATA-TF" })
        }
        Pdu::ReleaseRQ | Pdu::ReleaseRP => {
            let (pdu_type, name) = if let Pdu::ReleaseRQ = pdu {
                (PduType::ReleaseRQ, "A-RELEASE-RQ")
            } else {
                (PduType::ReleaseRP, "A-RELEASE-RP")
            };
            write_pdu_type(writer, pdu_type.code())?;

            write_chunk_u32(writer, |writer| {
                writer
                    .write_all(&[0u8; 4])
                    .context(WriteReservedSnafu { bytes: 4_u32 })
            })
            .context(WriteChunkSnafu { name })
        }
        Pdu::AbortRQ { source } => {
            write_pdu_type(writer, PduType::AbortRQ.code())?;

            write_chunk_u32(writer, |writer| {
                // 7-8 - Reserved
                writer
                    .write_all(&[0u8; 2])
                    .context(WriteReservedSnafu { bytes: 2_u32 })?;

                // 9 - Source, 10 - Reason/Diag
                let (source, reason) = source.to_codes();
                writer
                    .write_all(&[source, reason])
                    .context(WriteFieldSnafu {
                        field: "AbortRQSource",
                    })
            })
            .context(WriteChunkSnafu { name: "A-ABORT" })
        }
        Pdu::Unknown { pdu_type, data } => {
            write_pdu_type(writer, *pdu_type)?;

            write_chunk_u32(writer, |writer| {
                writer.write_all(data).context(WriteFieldSnafu {
                    field: "Unknown data",
                })
            })
            .context(WriteChunkSnafu { name: "Unknown" })
        }
    }
}

/// Write the fixed fields shared by A-ASSOCIATE-RQ and A-ASSOCIATE-AC
/// (bytes 7 to 74 of the PDU).
fn write_association_fixed_fields(
    writer: &mut dyn Write,
    protocol_version: u16,
    called_ae_title: &str,
    calling_ae_title: &str,
    codec: &dyn TextCodec,
) -> Result<()> {
    // 7-8 - Protocol-version
    writer
        .write_u16::<BigEndian>(protocol_version)
        .context(WriteFieldSnafu {
            field: "Protocol-version",
        })?;

    // 9-10 - Reserved
    writer
        .write_u16::<BigEndian>(0x00)
        .context(WriteReservedSnafu { bytes: 2_u32 })?;

    // 11-26 - Called-AE-title
    write_ae_title(writer, called_ae_title, codec, "Called-AE-title")?;

    // 27-42 - Calling-AE-title
    write_ae_title(writer, calling_ae_title, codec, "Calling-AE-title")?;

    // 43-74 - Reserved
    writer
        .write_all(&[0; 32])
        .context(WriteReservedSnafu { bytes: 32_u32 })
}

fn write_pdu_variable_presentation_context_proposed(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextProposed,
    codec: &dyn TextCodec,
) -> Result<()> {
    // 1 - Item-type - 20H
    write_pdu_type(writer, 0x20)?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6-8 - Reserved
        writer
            .write_all(&[0u8; 3])
            .context(WriteReservedSnafu { bytes: 3_u32 })?;

        // 9-xxx - one Abstract Syntax sub-item (30H)
        // and one or more Transfer Syntax sub-items (40H)
        write_text_item(
            writer,
            0x30,
            &presentation_context.abstract_syntax,
            codec,
            "Abstract-syntax-name",
        )?;

        for transfer_syntax in &presentation_context.transfer_syntaxes {
            write_text_item(writer, 0x40, transfer_syntax, codec, "Transfer-syntax-name")?;
        }

        Ok(())
    })
    .context(WriteChunkSnafu {
        name: "Presentation Context Item",
    })
}

fn write_pdu_variable_presentation_context_result(
    writer: &mut dyn Write,
    presentation_context: &PresentationContextResult,
    codec: &dyn TextCodec,
) -> Result<()> {
    // 1 - Item-type - 21H
    write_pdu_type(writer, 0x21)?;

    write_chunk_u16(writer, |writer| {
        // 5 - Presentation-context-ID
        writer
            .write_u8(presentation_context.id)
            .context(WriteFieldSnafu {
                field: "Presentation-context-ID",
            })?;

        // 6 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 7 - Result/Reason
        writer
            .write_u8(presentation_context.reason.clone() as u8)
            .context(WriteFieldSnafu {
                field: "Presentation Context Result/Reason",
            })?;

        // 8 - Reserved
        writer
            .write_u8(0x00)
            .context(WriteReservedSnafu { bytes: 1_u32 })?;

        // 9-xxx - one Transfer Syntax sub-item
        write_text_item(
            writer,
            0x40,
            &presentation_context.transfer_syntax,
            codec,
            "Transfer-syntax-name",
        )
    })
    .context(WriteChunkSnafu {
        name: "Presentation-context",
    })
}

fn write_pdu_variable_user_variables(
    writer: &mut dyn Write,
    user_variables: &[UserVariableItem],
    codec: &dyn TextCodec,
) -> Result<()> {
    if user_variables.is_empty() {
        return Ok(());
    }

    // 1 - Item-type - 50H
    write_pdu_type(writer, 0x50)?;

    write_chunk_u16(writer, |writer| {
        for user_variable in user_variables {
            match user_variable {
                UserVariableItem::MaxLength(max_length) => {
                    write_pdu_type(writer, 0x51)?;
                    write_chunk_u16(writer, |writer| {
                        writer
                            .write_u32::<BigEndian>(*max_length)
                            .context(WriteFieldSnafu {
                                field: "Maximum-length-received",
                            })
                    })
                    .context(WriteChunkSnafu {
                        name: "Maximum-length-received",
                    })?;
                }
                UserVariableItem::ImplementationClassUID(implementation_class_uid) => {
                    write_text_item(
                        writer,
                        0x52,
                        implementation_class_uid,
                        codec,
                        "Implementation-class-uid",
                    )?;
                }
                UserVariableItem::ImplementationVersionName(implementation_version_name) => {
                    write_text_item(
                        writer,
                        0x55,
                        implementation_version_name,
                        codec,
                        "Implementation-version-name",
                    )?;
                }
                UserVariableItem::Unknown(item_type, data) => {
                    write_pdu_type(writer, *item_type)?;
                    write_chunk_u16(writer, |writer| {
                        writer.write_all(data).context(WriteFieldSnafu {
                            field: "Unknown Data",
                        })
                    })
                    .context(WriteChunkSnafu { name: "Unknown" })?;
                }
            }
        }

        Ok(())
    })
    .context(WriteChunkSnafu { name: "User-data" })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_write_chunks_with_preceding_u32_length() -> Result<()> {
        let mut bytes = vec![0u8; 0];
        write_chunk_u32(&mut bytes, |writer| {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "Field1" })?;
            write_chunk_u32(writer, |writer| {
                writer
                    .write_u8(0x03)
                    .context(WriteFieldSnafu { field: "Field2" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Chunk2" })
        })
        .context(WriteChunkSnafu { name: "Chunk1" })?;

        assert_eq!(bytes.len(), 10);
        assert_eq!(bytes, &[0, 0, 0, 6, 2, 0, 0, 0, 1, 3]);

        Ok(())
    }

    #[test]
    fn can_write_chunks_with_preceding_u16_length() -> Result<()> {
        let mut bytes = vec![0u8; 0];
        write_chunk_u16(&mut bytes, |writer| {
            writer
                .write_u8(0x02)
                .context(WriteFieldSnafu { field: "Field1" })?;
            write_chunk_u16(writer, |writer| {
                writer
                    .write_u8(0x03)
                    .context(WriteFieldSnafu { field: "Field2" })?;
                Ok(())
            })
            .context(WriteChunkSnafu { name: "Chunk2" })
        })
        .context(WriteChunkSnafu { name: "Chunk1" })?;

        assert_eq!(bytes.len(), 6);
        assert_eq!(bytes, &[0, 4, 2, 0, 1, 3]);

        Ok(())
    }

    #[test]
    fn writes_abort_bytes() -> Result<()> {
        let mut bytes = Vec::new();
        write_pdu(
            &mut bytes,
            &Pdu::AbortRQ {
                source: AbortRQSource::ServiceProvider(
                    AbortRQServiceProviderReason::UnexpectedPdu,
                ),
            },
        )?;
        assert_eq!(bytes, &[0x07, 0, 0, 0, 0, 4, 0, 0, 2, 2]);
        Ok(())
    }

    #[test]
    fn writes_release_rq_bytes() -> Result<()> {
        let mut bytes = Vec::new();
        write_pdu(&mut bytes, &Pdu::ReleaseRQ)?;
        assert_eq!(bytes, &[0x05, 0, 0, 0, 0, 4, 0, 0, 0, 0]);
        Ok(())
    }
}
