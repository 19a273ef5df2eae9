//! Private utility module for working with UIDs

use std::borrow::Cow;

/// Remove the trailing null padding of a UID, if any.
pub(crate) fn trim_uid(uid: Cow<'_, str>) -> Cow<'_, str> {
    match uid {
        Cow::Borrowed(s) => Cow::Borrowed(s.trim_end_matches('\0')),
        Cow::Owned(s) if s.ends_with('\0') => Cow::Owned(s.trim_end_matches('\0').to_string()),
        owned => owned,
    }
}
