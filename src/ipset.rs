//! The preloaded set of valid internal destination addresses.
//!
//! The on-disk form is line oriented: one IPv4 address or `a.b.c.d/len`
//! CIDR block per line, with `#` comments and blank lines ignored. The
//! in-memory form is a sorted, merged list of inclusive address ranges
//! probed by binary search.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::Path;

use crate::ScanError;

#[derive(Debug, Clone, Default)]
pub struct IpSet {
    ranges: Vec<(u32, u32)>,
}

impl IpSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a set from a file path.
    pub fn load(path: &Path) -> Result<Self, ScanError> {
        let file = File::open(path).map_err(|source| ScanError::Io {
            context: format!("cannot open IP set '{}'", path.display()),
            source,
        })?;
        Self::from_reader(BufReader::new(file))
    }

    /// Read a set from any line-oriented source.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, ScanError> {
        let mut set = Self::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line.map_err(|source| ScanError::Io {
                context: format!("IP set read failed at line {}", idx + 1),
                source,
            })?;
            let entry = line.split('#').next().unwrap_or("").trim();
            if entry.is_empty() {
                continue;
            }
            let (addr, len) = match entry.split_once('/') {
                Some((addr, len)) => {
                    let len: u8 = len.parse().map_err(|_| ScanError::IpSet {
                        line: idx + 1,
                        message: format!("invalid prefix length '{len}'"),
                    })?;
                    if len > 32 {
                        return Err(ScanError::IpSet {
                            line: idx + 1,
                            message: format!("prefix length {len} out of range"),
                        });
                    }
                    (addr, len)
                }
                None => (entry, 32),
            };
            let base: Ipv4Addr = addr.parse().map_err(|_| ScanError::IpSet {
                line: idx + 1,
                message: format!("invalid IPv4 address '{addr}'"),
            })?;
            set.insert_cidr(base, len);
        }
        set.normalize();
        Ok(set)
    }

    /// Add every address covered by `base/len`.
    pub fn insert_cidr(&mut self, base: Ipv4Addr, len: u8) {
        let mask = if len == 0 { 0 } else { u32::MAX << (32 - len) };
        let start = u32::from(base) & mask;
        let end = start | !mask;
        self.ranges.push((start, end));
    }

    fn normalize(&mut self) {
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(start, end) in &self.ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => {
                    last.1 = last.1.max(end);
                }
                _ => merged.push((start, end)),
            }
        }
        self.ranges = merged;
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let ip = u32::from(ip);
        self.ranges
            .binary_search_by(|&(start, end)| {
                if ip < start {
                    std::cmp::Ordering::Greater
                } else if ip > end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
