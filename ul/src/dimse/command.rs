//! DIMSE command set codec.
//!
//! A command set is a data set of group `0000` elements,
//! always encoded in implicit VR little endian
//! and always starting with the _Command Group Length_ element.
//! The command group length is not kept in memory,
//! it is recalculated on [`encode`](CommandSet::encode).
use dicom_core::header::Header;
use dicom_core::value::ConvertValueError;
use dicom_core::{dicom_value, DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::mem::InMemElement;
use dicom_object::{InMemDicomObject, ReadError, WriteError};
use dicom_transfer_syntax_registry::entries::IMPLICIT_VR_LITTLE_ENDIAN;
use snafu::{Backtrace, ResultExt, Snafu};
use std::fmt;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// could not encode command set
    WriteCommand {
        source: WriteError,
        backtrace: Backtrace,
    },

    /// could not decode command set
    ReadCommand {
        source: ReadError,
        backtrace: Backtrace,
    },

    #[snafu(display("Element {} does not belong to the command group", tag))]
    UnexpectedGroup { tag: Tag, backtrace: Backtrace },

    #[snafu(display("Could not convert value of element {}", tag))]
    ConvertValue {
        tag: Tag,
        source: ConvertValueError,
        backtrace: Backtrace,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// DIMSE command field values.
#[allow(non_camel_case_types)]
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CommandField {
    C_STORE_RQ = 0x0001,
    C_STORE_RSP = 0x8001,
    C_GET_RQ = 0x0010,
    C_GET_RSP = 0x8010,
    C_FIND_RQ = 0x0020,
    C_FIND_RSP = 0x8020,
    C_MOVE_RQ = 0x0021,
    C_MOVE_RSP = 0x8021,
    C_ECHO_RQ = 0x0030,
    C_ECHO_RSP = 0x8030,
    C_CANCEL_RQ = 0x0FFF,
}

impl CommandField {
    pub fn from_code(code: u16) -> Option<CommandField> {
        use CommandField::*;
        [
            C_STORE_RQ,
            C_STORE_RSP,
            C_GET_RQ,
            C_GET_RSP,
            C_FIND_RQ,
            C_FIND_RSP,
            C_MOVE_RQ,
            C_MOVE_RSP,
            C_ECHO_RQ,
            C_ECHO_RSP,
            C_CANCEL_RQ,
        ]
        .iter()
        .copied()
        .find(|field| field.code() == code)
    }

    #[inline]
    pub fn code(self) -> u16 {
        self as u16
    }

    /// Whether this is the command field of a response.
    #[inline]
    pub fn is_response(self) -> bool {
        self.code() & 0x8000 != 0
    }
}

/// Values of the _Command Data Set Type_ element.
///
/// Any value other than `0x0101` means that a data set follows.
#[repr(u16)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CommandDatasetType {
    Present = 0x0001,
    Absent = 0x0101,
}

impl CommandDatasetType {
    pub fn from_code(code: u16) -> CommandDatasetType {
        if code == CommandDatasetType::Absent as u16 {
            CommandDatasetType::Absent
        } else {
            CommandDatasetType::Present
        }
    }
}

/// An in-memory DIMSE command set.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSet {
    obj: InMemDicomObject,
}

impl Default for CommandSet {
    fn default() -> Self {
        CommandSet::new()
    }
}

impl CommandSet {
    pub fn new() -> Self {
        CommandSet {
            obj: InMemDicomObject::new_empty(),
        }
    }

    /// Build a C-ECHO-RQ command.
    pub fn echo_rq(message_id: u16) -> Self {
        CommandSet::new()
            .with_uid(tags::AFFECTED_SOP_CLASS_UID, uids::VERIFICATION)
            .with_u16(tags::COMMAND_FIELD, CommandField::C_ECHO_RQ.code())
            .with_u16(tags::MESSAGE_ID, message_id)
            .with_u16(
                tags::COMMAND_DATA_SET_TYPE,
                CommandDatasetType::Absent as u16,
            )
    }

    /// Build a C-ECHO-RSP command
    /// responding to the request with the given message ID.
    pub fn echo_rsp(message_id: u16, status: u16) -> Self {
        CommandSet::new()
            .with_uid(tags::AFFECTED_SOP_CLASS_UID, uids::VERIFICATION)
            .with_u16(tags::COMMAND_FIELD, CommandField::C_ECHO_RSP.code())
            .with_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO, message_id)
            .with_u16(
                tags::COMMAND_DATA_SET_TYPE,
                CommandDatasetType::Absent as u16,
            )
            .with_u16(tags::STATUS, status)
    }

    pub fn with_u16(mut self, tag: Tag, value: u16) -> Self {
        self.put_u16(tag, value);
        self
    }

    pub fn with_uid(mut self, tag: Tag, uid: &str) -> Self {
        self.put_uid(tag, uid);
        self
    }

    /// Insert or replace an element of value representation US.
    pub fn put_u16(&mut self, tag: Tag, value: u16) {
        self.obj
            .put(DataElement::new(tag, VR::US, dicom_value!(U16, [value])));
    }

    /// Insert or replace an element of value representation UI,
    /// padded with a trailing null character to an even length.
    pub fn put_uid(&mut self, tag: Tag, uid: &str) {
        let mut value = uid.to_string();
        if value.len() % 2 == 1 {
            value.push('\0');
        }
        self.obj
            .put(DataElement::new(tag, VR::UI, PrimitiveValue::from(value)));
    }

    /// The element with the given tag, if present.
    pub fn get(&self, tag: Tag) -> Option<&InMemElement> {
        self.obj.element(tag).ok()
    }

    /// The value of an element of value representation US.
    pub fn get_u16(&self, tag: Tag) -> Result<Option<u16>> {
        self.get(tag)
            .map(|e| e.to_int::<u16>().context(ConvertValueSnafu { tag }))
            .transpose()
    }

    /// The value of an element of value representation UI,
    /// without padding.
    pub fn get_uid(&self, tag: Tag) -> Result<Option<String>> {
        self.get(tag)
            .map(|e| {
                e.value()
                    .to_str()
                    .context(ConvertValueSnafu { tag })
                    .map(|uid| {
                        uid.trim_end_matches(|c: char| c == '\0' || c == ' ')
                            .to_string()
                    })
            })
            .transpose()
    }

    pub fn command_field(&self) -> Result<Option<u16>> {
        self.get_u16(tags::COMMAND_FIELD)
    }

    pub fn message_id(&self) -> Result<Option<u16>> {
        self.get_u16(tags::MESSAGE_ID)
    }

    pub fn message_id_being_responded_to(&self) -> Result<Option<u16>> {
        self.get_u16(tags::MESSAGE_ID_BEING_RESPONDED_TO)
    }

    pub fn affected_sop_class_uid(&self) -> Result<Option<String>> {
        self.get_uid(tags::AFFECTED_SOP_CLASS_UID)
    }

    /// The raw status code of a response command.
    pub fn status(&self) -> Result<Option<u16>> {
        self.get_u16(tags::STATUS)
    }

    /// Whether a data set follows this command.
    ///
    /// A missing _Command Data Set Type_ is interpreted as absent.
    pub fn has_data_set(&self) -> Result<bool> {
        Ok(self
            .get_u16(tags::COMMAND_DATA_SET_TYPE)?
            .map(CommandDatasetType::from_code)
            == Some(CommandDatasetType::Present))
    }

    /// The command elements as a DICOM object,
    /// without the command group length.
    pub fn object(&self) -> &InMemDicomObject {
        &self.obj
    }

    /// Encode the command set in implicit VR little endian,
    /// starting with the command group length.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let obj = InMemDicomObject::command_from_element_iter(self.obj.clone());
        let mut data = Vec::new();
        obj.write_dataset_with_ts(&mut data, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
            .context(WriteCommandSnafu)?;
        Ok(data)
    }

    /// Decode a command set in implicit VR little endian.
    ///
    /// The command group length element, if present, is not retained.
    pub fn parse(bytes: &[u8]) -> Result<CommandSet> {
        let mut obj =
            InMemDicomObject::read_dataset_with_ts(bytes, &IMPLICIT_VR_LITTLE_ENDIAN.erased())
                .context(ReadCommandSnafu)?;
        if let Some(e) = (&obj).into_iter().find(|e| e.tag().group() != 0x0000) {
            return UnexpectedGroupSnafu { tag: e.tag() }.fail();
        }
        obj.remove_element(tags::COMMAND_GROUP_LENGTH);
        Ok(CommandSet { obj })
    }
}

impl fmt::Display for CommandSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, e) in (&self.obj).into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {:?}", e.tag(), e.vr())?;
        }
        f.write_str("]")
    }
}
