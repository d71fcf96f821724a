//  FRAME.rs
//    by Lut99
//
//  Created:
//    20 Feb 2023, 09:44:16
//  Last edited:
//    30 May 2023, 14:21:55
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the record frame format buckets are written in:
//!   `[4-byte big-endian key length][key][4-byte big-endian value length]
//!   [value]`, repeated until end-of-file. A zero-length key with a
//!   zero-length value is accepted as an end-of-stream sentinel when
//!   decoding; sealed buckets simply end at a frame boundary instead.
//

use std::io::{Read, Write};

use crate::errors::FrameError;


/***** LIBRARY *****/
/// Appends one framed record to the given writer.
///
/// # Arguments
/// - `out`: The writer to append to.
/// - `key`: The record's key bytes.
/// - `value`: The record's value bytes.
///
/// # Errors
/// This function errors if the underlying writer does.
pub fn write_record(out: &mut impl Write, key: &[u8], value: &[u8]) -> Result<(), std::io::Error> {
    out.write_all(&(key.len() as u32).to_be_bytes())?;
    out.write_all(key)?;
    out.write_all(&(value.len() as u32).to_be_bytes())?;
    out.write_all(value)?;
    Ok(())
}

/// Encodes the given records as one contiguous frame stream.
pub fn encode_records<'r>(records: impl IntoIterator<Item = &'r (Vec<u8>, Vec<u8>)>) -> Vec<u8> {
    let mut buf: Vec<u8> = Vec::new();
    for (key, value) in records {
        // Writing to a Vec cannot fail
        write_record(&mut buf, key, value).unwrap();
    }
    buf
}



/// Iterates the records in a frame stream.
///
/// Stops cleanly at end-of-file on a frame boundary or at the zero/zero sentinel; anything else
/// mid-frame is a [`FrameError::TruncatedFrame`].
pub struct FrameReader<R> {
    /// The stream we decode from.
    inner  : R,
    /// How many bytes we consumed, for error reporting.
    offset : u64,
    /// Whether we hit the end (cleanly or not).
    done   : bool,
}

impl<R: Read> FrameReader<R> {
    /// Constructor for a FrameReader over the given byte stream.
    #[inline]
    pub fn new(inner: R) -> Self {
        Self{ inner, offset: 0, done: false }
    }

    /// Reads one 4-byte big-endian length field.
    ///
    /// # Returns
    /// The length, or `None` on clean end-of-file (only legal before a key length).
    fn read_len(&mut self, allow_eof: bool) -> Result<Option<u32>, FrameError> {
        let mut buf: [u8; 4] = [0; 4];
        let mut filled: usize = 0;
        while filled < 4 {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    if filled == 0 && allow_eof { return Ok(None); }
                    return Err(FrameError::TruncatedFrame{ offset: self.offset + filled as u64 });
                },
                Ok(n)    => { filled += n; },
                Err(err) => {
                    if err.kind() == std::io::ErrorKind::Interrupted { continue; }
                    return Err(FrameError::ReadError{ offset: self.offset + filled as u64, err });
                },
            }
        }
        self.offset += 4;
        Ok(Some(u32::from_be_bytes(buf)))
    }

    /// Reads exactly `len` payload bytes.
    fn read_payload(&mut self, len: u32) -> Result<Vec<u8>, FrameError> {
        let mut buf: Vec<u8> = vec![0; len as usize];
        match self.inner.read_exact(&mut buf) {
            Ok(_) => {
                self.offset += len as u64;
                Ok(buf)
            },
            Err(err) => {
                if err.kind() == std::io::ErrorKind::UnexpectedEof { return Err(FrameError::TruncatedFrame{ offset: self.offset }); }
                Err(FrameError::ReadError{ offset: self.offset, err })
            },
        }
    }
}

impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<(Vec<u8>, Vec<u8>), FrameError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done { return None; }

        // Key length (EOF is clean here), key, value length, value
        let res: Result<(Vec<u8>, Vec<u8>), FrameError> = (|| {
            let key_len: u32 = match self.read_len(true)? {
                Some(len) => len,
                None      => { return Ok((vec![], vec![])); },
            };
            let key: Vec<u8> = self.read_payload(key_len)?;
            let value_len: u32 = self.read_len(false)?.unwrap();
            let value: Vec<u8> = self.read_payload(value_len)?;
            Ok((key, value))
        })();

        match res {
            Ok((key, value)) => {
                // Clean EOF and the zero/zero sentinel both end the stream; the sentinel is
                // reserved, so an empty/empty pair is never a real record.
                if key.is_empty() && value.is_empty() { self.done = true; return None; }
                Some(Ok((key, value)))
            },
            Err(err) => {
                self.done = true;
                Some(Err(err))
            },
        }
    }
}



/// Decodes a complete in-memory frame stream into its records.
///
/// # Errors
/// This function errors if the stream is truncated mid-frame.
pub fn decode_records(raw: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, FrameError> {
    FrameReader::new(raw).collect()
}


/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let records: Vec<(Vec<u8>, Vec<u8>)> = vec![
            (b"a".to_vec(), b"1".to_vec()),
            (b"".to_vec(), b"only-value".to_vec()),
            (b"key".to_vec(), b"".to_vec()),
            (vec![0, 255, 42], vec![1, 2, 3, 4]),
        ];
        let encoded: Vec<u8> = encode_records(&records);
        assert_eq!(decode_records(&encoded).unwrap(), records);
    }

    #[test]
    fn empty_stream() {
        assert_eq!(decode_records(&[]).unwrap(), vec![]);
    }

    #[test]
    fn sentinel_ends_stream() {
        let mut encoded: Vec<u8> = encode_records(&[(b"a".to_vec(), b"1".to_vec())]);
        // zero/zero sentinel, then trailing garbage that must not be decoded
        encoded.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        encoded.extend_from_slice(b"junk");
        assert_eq!(decode_records(&encoded).unwrap(), vec![(b"a".to_vec(), b"1".to_vec())]);
    }

    #[test]
    fn truncated_frame() {
        let encoded: Vec<u8> = encode_records(&[(b"abc".to_vec(), b"def".to_vec())]);
        assert!(matches!(decode_records(&encoded[..5]), Err(FrameError::TruncatedFrame{ .. })));
        assert!(matches!(decode_records(&encoded[..encoded.len() - 1]), Err(FrameError::TruncatedFrame{ .. })));
    }
}
