//! Transfer syntax support checks.
//!
//! An association only becomes established
//! if the transfer syntax accepted by the remote node
//! is one which this node is prepared to work with.
//! The set of such transfer syntaxes is either given explicitly
//! or delegated to a transfer syntax index,
//! by default the main [`TransferSyntaxRegistry`].
use dicom_encoding::transfer_syntax::TransferSyntaxIndex;
use dicom_transfer_syntax_registry::TransferSyntaxRegistry;
use std::borrow::Cow;

use super::uid::trim_uid;

/// Check whether the given transfer syntax UID
/// is a member of the given set of supported transfer syntaxes.
///
/// Trailing null characters on either side are ignored.
///
/// ```
/// # use dicom_association::association::syntax::is_supported_in;
/// let supported = ["1.2.840.10008.1.2.1", "1.2.840.10008.1.2"];
/// assert!(is_supported_in(&supported, "1.2.840.10008.1.2\0"));
/// assert!(!is_supported_in(&supported, "1.2.840.10008.1.2.4.50"));
/// ```
pub fn is_supported_in<T>(supported: &[T], ts_uid: &str) -> bool
where
    T: AsRef<str>,
{
    let ts_uid = trim_uid(Cow::Borrowed(ts_uid));
    supported
        .iter()
        .any(|ts| trim_uid(Cow::Borrowed(ts.as_ref())) == ts_uid)
}

/// Check that the given transfer syntax repository
/// supports the given transfer syntax,
/// meaning that it can parse and decode DICOM data sets.
pub fn is_supported_with_repo<R>(ts_repo: R, ts_uid: &str) -> bool
where
    R: TransferSyntaxIndex,
{
    let ts_uid = trim_uid(Cow::Borrowed(ts_uid));
    ts_repo
        .get(&ts_uid)
        .filter(|ts| !ts.is_unsupported())
        .is_some()
}

/// Check that the main transfer syntax registry
/// supports the given transfer syntax.
///
/// ```
/// # use dicom_association::association::syntax::is_supported;
/// // Implicit VR Little Endian is guaranteed to be supported
/// assert!(is_supported("1.2.840.10008.1.2"));
/// ```
pub fn is_supported(ts_uid: &str) -> bool {
    is_supported_with_repo(TransferSyntaxRegistry, ts_uid)
}

/// From a sequence of transfer syntaxes,
/// choose the first one found in the supported set.
pub fn choose_supported_in<'a, I, T>(supported: &[T], it: I) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
    T: AsRef<str>,
{
    it.into_iter().find(|ts| is_supported_in(supported, ts))
}
