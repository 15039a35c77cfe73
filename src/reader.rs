//! Flowpack stream reader.
//!
//! A stream is an 8-byte header followed by fixed-size records until end
//! of input. The reader is an iterator over records; it stops at the first
//! error and reports it once.

use nom_derive::{Nom, Parse};

use std::io::{self, Read};

use crate::ScanError;
use crate::flow::FlowRecord;

/// `FPK1` in big-endian.
pub const FLOWPACK_MAGIC: u32 = 0x46504B31;
pub const FLOWPACK_VERSION: u16 = 1;

const HEADER_LEN: usize = 8;
const RECORD_LEN: usize = 32;

#[derive(Nom, Debug, Clone, Copy)]
struct FlowpackHeader {
    magic: u32,
    version: u16,
    #[allow(dead_code)]
    reserved: u16,
}

/// Iterator over the records of one flowpack stream.
#[derive(Debug)]
pub struct FlowReader<R: Read> {
    inner: R,
    errored: bool,
}

impl<R: Read> FlowReader<R> {
    /// Open a stream: consumes and validates the header.
    pub fn new(mut inner: R) -> Result<Self, ScanError> {
        let mut buf = [0u8; HEADER_LEN];
        let filled = fill(&mut inner, &mut buf).map_err(|source| ScanError::Io {
            context: "flowpack header read failed".to_string(),
            source,
        })?;
        if filled < HEADER_LEN {
            return Err(ScanError::Truncated {
                available: filled,
                context: "flowpack header".to_string(),
            });
        }
        let (_, header) = FlowpackHeader::parse(&buf).map_err(|_| ScanError::Truncated {
            available: filled,
            context: "flowpack header".to_string(),
        })?;
        if header.magic != FLOWPACK_MAGIC {
            return Err(ScanError::BadMagic { found: header.magic });
        }
        if header.version != FLOWPACK_VERSION {
            return Err(ScanError::UnsupportedVersion {
                version: header.version,
            });
        }
        Ok(Self {
            inner,
            errored: false,
        })
    }
}

impl<R: Read> Iterator for FlowReader<R> {
    type Item = Result<FlowRecord, ScanError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.errored {
            return None;
        }
        let mut buf = [0u8; RECORD_LEN];
        let filled = match fill(&mut self.inner, &mut buf) {
            Ok(n) => n,
            Err(source) => {
                self.errored = true;
                return Some(Err(ScanError::Io {
                    context: "flow record read failed".to_string(),
                    source,
                }));
            }
        };
        match filled {
            0 => None,
            RECORD_LEN => match FlowRecord::parse(&buf) {
                Ok((_, rec)) => Some(Ok(rec)),
                Err(_) => {
                    self.errored = true;
                    Some(Err(ScanError::Truncated {
                        available: filled,
                        context: "flow record".to_string(),
                    }))
                }
            },
            partial => {
                self.errored = true;
                Some(Err(ScanError::Truncated {
                    available: partial,
                    context: "flow record".to_string(),
                }))
            }
        }
    }
}

fn fill<R: Read>(inner: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match inner.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Serialize records into a complete flowpack stream.
pub fn flowpack_bytes(records: &[FlowRecord]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(HEADER_LEN + records.len() * RECORD_LEN);
    bytes.extend_from_slice(&FLOWPACK_MAGIC.to_be_bytes());
    bytes.extend_from_slice(&FLOWPACK_VERSION.to_be_bytes());
    bytes.extend_from_slice(&0u16.to_be_bytes());
    for rec in records {
        bytes.extend_from_slice(&rec.to_be_bytes());
    }
    bytes
}
