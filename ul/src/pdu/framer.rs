//! PDU framing module
//!
//! The upper layer protocol runs on top of a byte stream,
//! which may deliver a PDU in several pieces,
//! or several PDUs in a single piece.
//! [`PduFramer`] collects whatever the stream provides
//! and hands out one complete PDU at a time,
//! as determined by the length field of its 6-byte header.
use bytes::{Bytes, BytesMut};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use std::io::{ErrorKind, Read};
use tracing::{trace, warn};

use crate::pdu::{PduHeader, PduType, MAXIMUM_PDU_SIZE};

/// The number of bytes requested from the stream on each read.
const READ_CHUNK_SIZE: usize = 8_192;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// the stream ended before a complete PDU could be read
    #[snafu(display(
        "Connection closed by peer ({} bytes of an incomplete PDU buffered)",
        buffered
    ))]
    ConnectionClosed { buffered: usize, backtrace: Backtrace },

    #[snafu(display("Could not read from stream"))]
    ReadStream {
        source: std::io::Error,
        backtrace: Backtrace,
    },

    #[snafu(display("Unrecognized PDU type {:#04x} at the start of a PDU", pdu_type))]
    UnrecognizedPduType { pdu_type: u8, backtrace: Backtrace },

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
}

impl Error {
    /// Whether the error comes from the underlying stream
    /// (as opposed to the contents of the stream).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::ConnectionClosed { .. } | Error::ReadStream { .. }
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A reassembler of complete PDUs out of a byte stream.
///
/// Bytes received past the end of the PDU handed out
/// are kept for the following call to [`next_frame`](Self::next_frame).
///
/// # Example
///
/// ```
/// # use dicom_association::pdu::PduFramer;
/// // two A-RELEASE-RP PDUs delivered together
/// let mut stream: &[u8] = &[
///     0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00,
///     0x06, 0x00, 0x00, 0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00,
/// ];
/// let mut framer = PduFramer::new(16_384);
/// let first = framer.next_frame(&mut stream)?;
/// assert_eq!(first.len(), 10);
/// assert_eq!(framer.pending().len(), 10);
/// let second = framer.next_frame(&mut stream)?;
/// assert_eq!(second, first);
/// assert!(framer.pending().is_empty());
/// # Ok::<(), dicom_association::pdu::framer::Error>(())
/// ```
#[derive(Debug)]
pub struct PduFramer {
    /// bytes received but not yet handed out
    buffer: BytesMut,
    /// scratch space for reading from the stream
    chunk: Vec<u8>,
    /// the maximum admitted value of the PDU length field
    max_pdu_length: u32,
    /// whether to refuse PDUs longer than `max_pdu_length`
    strict: bool,
}

impl PduFramer {
    /// Create a new framer in strict mode,
    /// refusing PDUs with a length greater than `max_pdu_length`.
    pub fn new(max_pdu_length: u32) -> Self {
        PduFramer {
            buffer: BytesMut::with_capacity(READ_CHUNK_SIZE),
            chunk: vec![0; READ_CHUNK_SIZE],
            max_pdu_length,
            strict: true,
        }
    }

    /// Override strict mode.
    ///
    /// In lenient mode, PDUs longer than the maximum length
    /// are admitted with a warning,
    /// up to [`MAXIMUM_PDU_SIZE`].
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// The maximum admitted value of the PDU length field.
    pub fn max_pdu_length(&self) -> u32 {
        self.max_pdu_length
    }

    pub fn set_max_pdu_length(&mut self, max_pdu_length: u32) {
        self.max_pdu_length = max_pdu_length;
    }

    /// The bytes received which do not belong to any PDU handed out so far.
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Drop all buffered bytes,
    /// returning how many were discarded.
    pub fn discard(&mut self) -> usize {
        let n = self.buffer.len();
        self.buffer.clear();
        n
    }

    /// Obtain the next complete PDU from the stream,
    /// header included.
    ///
    /// Blocks on the stream for as long as the buffered bytes
    /// do not make up a full PDU.
    pub fn next_frame<R>(&mut self, reader: &mut R) -> Result<Bytes>
    where
        R: Read + ?Sized,
    {
        if self.buffer.is_empty() {
            self.fill(reader)?;
        }

        let pdu_type = self.buffer[0];
        ensure!(
            PduType::from_code(pdu_type).is_some(),
            UnrecognizedPduTypeSnafu { pdu_type }
        );

        // the header itself may be split across reads
        let header = loop {
            if let Some(header) = PduHeader::parse(&self.buffer) {
                break header;
            }
            self.fill(reader)?;
        };
        self.check_length(header.length)?;

        let total_length = header.total_length();
        while self.buffer.len() < total_length {
            self.fill(reader)?;
        }

        let frame = if self.buffer.len() > total_length {
            trace!(
                "Retaining {} bytes past the end of the PDU",
                self.buffer.len() - total_length
            );
            self.buffer.split_to(total_length)
        } else {
            self.buffer.split()
        };
        Ok(frame.freeze())
    }

    fn check_length(&self, pdu_length: u32) -> Result<()> {
        if self.strict {
            ensure!(
                pdu_length <= self.max_pdu_length,
                PduTooLargeSnafu {
                    pdu_length,
                    max_pdu_length: self.max_pdu_length,
                }
            );
        } else if pdu_length > self.max_pdu_length {
            ensure!(
                pdu_length <= MAXIMUM_PDU_SIZE,
                PduTooLargeSnafu {
                    pdu_length,
                    max_pdu_length: MAXIMUM_PDU_SIZE,
                }
            );
            warn!(
                "Incoming pdu was too large: length {}, maximum is {}",
                pdu_length, self.max_pdu_length
            );
        }
        Ok(())
    }

    /// Perform one read from the stream, appending to the buffer.
    fn fill<R>(&mut self, reader: &mut R) -> Result<()>
    where
        R: Read + ?Sized,
    {
        let n = loop {
            match reader.read(&mut self.chunk) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e).context(ReadStreamSnafu),
            }
        };
        ensure!(
            n > 0,
            ConnectionClosedSnafu {
                buffered: self.buffer.len()
            }
        );
        self.buffer.extend_from_slice(&self.chunk[..n]);
        Ok(())
    }
}

impl Default for PduFramer {
    fn default() -> Self {
        PduFramer::new(crate::pdu::DEFAULT_MAX_PDU)
    }
}

#[cfg(test)]
mod tests {
    use super::{Error, PduFramer};
    use matches::assert_matches;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::io::Read;

    /// A reader which hands out predetermined pieces of data,
    /// one per call to `read`, then signals the end of the stream.
    struct ChunkedReader {
        chunks: VecDeque<Vec<u8>>,
        reads: usize,
    }

    impl ChunkedReader {
        fn new<I>(chunks: I) -> Self
        where
            I: IntoIterator<Item = Vec<u8>>,
        {
            ChunkedReader {
                chunks: chunks.into_iter().collect(),
                reads: 0,
            }
        }
    }

    impl Read for ChunkedReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.reads += 1;
            let chunk = match self.chunks.front_mut() {
                Some(chunk) => chunk,
                None => return Ok(0),
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            chunk.drain(..n);
            if chunk.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }
    }

    fn pdu(pdu_type: u8, body_len: u32, fill: u8) -> Vec<u8> {
        let mut out = vec![pdu_type, 0];
        out.extend_from_slice(&body_len.to_be_bytes());
        out.extend(std::iter::repeat(fill).take(body_len as usize));
        out
    }

    /// Split `data` at the given (sorted, deduplicated) positions.
    fn split_at_points(data: &[u8], points: &[usize]) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut start = 0;
        for &p in points {
            if p > start && p < data.len() {
                chunks.push(data[start..p].to_vec());
                start = p;
            }
        }
        chunks.push(data[start..].to_vec());
        chunks
    }

    #[test]
    fn reassembles_pdu_from_uneven_reads() {
        // 16 bytes of P-DATA-TF followed by the start of the next PDU,
        // which arrives along with the last fragment
        let mut data = pdu(0x04, 10, 0xAA);
        data.extend([0x05, 0x00]);
        let mut reader = ChunkedReader::new(vec![
            data[..3].to_vec(),
            data[3..8].to_vec(),
            data[8..].to_vec(),
        ]);

        let mut framer = PduFramer::new(16_384);
        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(&frame[..], &data[..16]);
        assert_eq!(framer.pending(), &[0x05, 0x00]);
        assert_eq!(reader.reads, 3);

        assert_eq!(framer.discard(), 2);
        assert!(framer.pending().is_empty());
    }

    #[test]
    fn reassembles_pdu_from_single_byte_reads() {
        let data = pdu(0x02, 25, 0x11);
        let mut reader = ChunkedReader::new(data.iter().map(|b| vec![*b]));

        let mut framer = PduFramer::new(16_384);
        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(&frame[..], &data[..]);
        assert!(framer.pending().is_empty());
        assert_eq!(reader.reads, data.len());
    }

    #[test]
    fn splits_two_pdus_in_one_read() {
        let first = pdu(0x04, 10, 0x01);
        let second = pdu(0x04, 14, 0x02);
        assert_eq!(first.len(), 16);
        assert_eq!(second.len(), 20);
        let mut all = first.clone();
        all.extend_from_slice(&second);
        let mut reader = ChunkedReader::new(vec![all]);

        let mut framer = PduFramer::new(16_384);
        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(&frame[..], &first[..]);
        assert_eq!(framer.pending(), &second[..]);

        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(&frame[..], &second[..]);
        assert!(framer.pending().is_empty());
        assert_eq!(reader.reads, 1);
    }

    #[test]
    fn zero_byte_read_is_connection_closed() {
        let mut framer = PduFramer::new(16_384);
        let mut reader = ChunkedReader::new(Vec::<Vec<u8>>::new());
        let e = framer.next_frame(&mut reader).unwrap_err();
        assert_matches!(e, Error::ConnectionClosed { buffered: 0, .. });
        assert!(e.is_transport());

        // closed in the middle of a PDU
        let data = pdu(0x04, 10, 0xAA);
        let mut reader = ChunkedReader::new(vec![data[..9].to_vec()]);
        assert_matches!(
            framer.next_frame(&mut reader),
            Err(Error::ConnectionClosed { buffered: 9, .. })
        );
    }

    #[test]
    fn truncated_header_waits_for_more_bytes() {
        let data = pdu(0x06, 4, 0x00);
        let mut reader = ChunkedReader::new(vec![data[..2].to_vec(), data[2..].to_vec()]);
        let mut framer = PduFramer::new(16_384);
        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(&frame[..], &data[..]);
    }

    #[test]
    fn unrecognized_leading_byte_is_an_error() {
        let mut reader = ChunkedReader::new(vec![pdu(0x09, 4, 0x00)]);
        let mut framer = PduFramer::new(16_384);
        let e = framer.next_frame(&mut reader).unwrap_err();
        assert_matches!(e, Error::UnrecognizedPduType { pdu_type: 0x09, .. });
        assert!(!e.is_transport());
    }

    #[test]
    fn length_over_maximum_is_refused() {
        let mut reader = ChunkedReader::new(vec![vec![0x04, 0x00, 0x00, 0x01, 0x00, 0x00]]);
        let mut framer = PduFramer::new(4_096);
        assert_matches!(
            framer.next_frame(&mut reader),
            Err(Error::PduTooLarge {
                pdu_length: 65_536,
                max_pdu_length: 4_096,
                ..
            })
        );

        // lenient mode admits it
        let data = pdu(0x04, 5_000, 0x00);
        let mut reader = ChunkedReader::new(vec![data.clone()]);
        let mut framer = PduFramer::new(4_096).strict(false);
        let frame = framer.next_frame(&mut reader).unwrap();
        assert_eq!(frame.len(), data.len());
    }

    proptest! {
        #[test]
        fn same_frames_regardless_of_split_points(
            lengths in proptest::collection::vec(0u32..64, 1..6),
            mut points in proptest::collection::vec(0usize..512, 0..32),
        ) {
            let pdus: Vec<Vec<u8>> = lengths
                .iter()
                .enumerate()
                .map(|(i, len)| pdu(0x04, *len, i as u8))
                .collect();
            let stream: Vec<u8> = pdus.concat();
            points.sort_unstable();
            points.dedup();
            let mut reader = ChunkedReader::new(split_at_points(&stream, &points));

            let mut framer = PduFramer::new(16_384);
            for expected in &pdus {
                let frame = framer.next_frame(&mut reader).unwrap();
                prop_assert_eq!(&frame[..], &expected[..]);
            }
            prop_assert!(framer.pending().is_empty());
        }
    }
}
