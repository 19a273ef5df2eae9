//! DIMSE status codes.
use std::fmt;

/// The outcome of a DIMSE operation,
/// as classified from the 16-bit status code
/// found in the response command set.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DimseStatus {
    /// `0x0000`
    Success,
    /// `0xFF00` or `0xFF01`: more responses will follow
    Pending,
    /// operation completed with a warning (code retained)
    Warning(u16),
    /// operation failed (code retained)
    Failure(u16),
    /// `0xFE00`
    Cancel,
}

impl DimseStatus {
    /// Classify a status code.
    ///
    /// Returns `None` for codes outside of all known ranges.
    pub fn from_code(code: u16) -> Option<DimseStatus> {
        match code {
            0x0000 => Some(DimseStatus::Success),
            0xFF00 | 0xFF01 => Some(DimseStatus::Pending),
            0xFE00 => Some(DimseStatus::Cancel),
            0x0001 | 0x0107 | 0x0116 | 0xB000..=0xBFFF => Some(DimseStatus::Warning(code)),
            0x0100..=0x02FF | 0xA000..=0xAFFF | 0xC000..=0xCFFF => {
                Some(DimseStatus::Failure(code))
            }
            _ => None,
        }
    }

    /// The status code.
    ///
    /// `Pending` always maps back to `0xFF00`.
    pub fn code(self) -> u16 {
        match self {
            DimseStatus::Success => 0x0000,
            DimseStatus::Pending => 0xFF00,
            DimseStatus::Cancel => 0xFE00,
            DimseStatus::Warning(code) | DimseStatus::Failure(code) => code,
        }
    }

    #[inline]
    pub fn is_pending(self) -> bool {
        self == DimseStatus::Pending
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == DimseStatus::Success
    }
}

impl fmt::Display for DimseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimseStatus::Success => f.write_str("success"),
            DimseStatus::Pending => f.write_str("pending"),
            DimseStatus::Cancel => f.write_str("cancel"),
            DimseStatus::Warning(code) => write!(f, "warning ({:#06x})", code),
            DimseStatus::Failure(code) => write!(f, "failure ({:#06x})", code),
        }
    }
}
