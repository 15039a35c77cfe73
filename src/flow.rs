//! Flow record model.
//!
//! A flowpack stream carries fixed 32-byte records in big-endian order.
//! The layout is mirrored by [`FlowRecord`]'s field order; `to_be_bytes`
//! produces the same layout for exporting.

use nom::number::complete::be_u32;
use nom_derive::*;
use serde::Serialize;

use std::cmp::Ordering;
use std::net::Ipv4Addr;

use crate::protocol::FlowProtocol;

/// TCP flag bits as they appear in the record's flag byte.
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;

    /// The connection-state flags considered by the TRW hit/miss rule.
    pub const STATE_MASK: u8 = FIN | SYN | RST | ACK;
}

/// Whether a flag byte matches a backscatter response pattern: a bare RST,
/// SYN+ACK, or RST+ACK and nothing else.
pub fn is_backscatter_pattern(flags: u8) -> bool {
    flags == tcp_flags::RST
        || flags == (tcp_flags::SYN | tcp_flags::ACK)
        || flags == (tcp_flags::RST | tcp_flags::ACK)
}

#[derive(Nom, Debug, PartialEq, Eq, Clone, Copy, Serialize)]
pub struct FlowRecord {
    /// Source IP address
    #[nom(Map = "Ipv4Addr::from", Parse = "be_u32")]
    pub sip: Ipv4Addr,
    /// Destination IP address
    #[nom(Map = "Ipv4Addr::from", Parse = "be_u32")]
    pub dip: Ipv4Addr,
    /// TCP/UDP source port; zero for ICMP
    pub sport: u16,
    /// TCP/UDP destination port; zero for ICMP
    pub dport: u16,
    /// IP protocol number (for example, TCP = 6; UDP = 17)
    pub protocol_number: u8,
    /// Cumulative OR of TCP flags over the flow; zero for non-TCP
    pub flags: u8,
    /// ICMP type; meaningful only when the protocol is ICMP
    pub icmp_type: u8,
    /// ICMP code; meaningful only when the protocol is ICMP
    pub icmp_code: u8,
    /// Packets in the flow
    pub pkts: u32,
    /// Total layer-3 bytes in the packets of the flow
    pub bytes: u32,
    /// Flow start time, seconds since the UNIX epoch
    pub stime: u32,
    /// Flow end time, seconds since the UNIX epoch
    pub etime: u32,
}

impl FlowRecord {
    /// Source IP as a host-order integer.
    pub fn sip_u32(&self) -> u32 {
        u32::from(self.sip)
    }

    /// Destination IP as a host-order integer.
    pub fn dip_u32(&self) -> u32 {
        u32::from(self.dip)
    }

    /// The record's protocol, when it is one scan detection supports.
    pub fn protocol(&self) -> Result<FlowProtocol, u8> {
        FlowProtocol::try_from(self.protocol_number)
    }

    /// Mean bytes per packet, zero for degenerate zero-packet records.
    pub fn bytes_per_pkt(&self) -> u32 {
        self.bytes.checked_div(self.pkts).unwrap_or(0)
    }

    /// Convert the record to its 32-byte big-endian wire form.
    pub fn to_be_bytes(&self) -> Vec<u8> {
        let mut result = Vec::with_capacity(32);
        result.extend_from_slice(&self.sip.octets());
        result.extend_from_slice(&self.dip.octets());
        result.extend_from_slice(&self.sport.to_be_bytes());
        result.extend_from_slice(&self.dport.to_be_bytes());
        result.push(self.protocol_number);
        result.push(self.flags);
        result.push(self.icmp_type);
        result.push(self.icmp_code);
        result.extend_from_slice(&self.pkts.to_be_bytes());
        result.extend_from_slice(&self.bytes.to_be_bytes());
        result.extend_from_slice(&self.stime.to_be_bytes());
        result.extend_from_slice(&self.etime.to_be_bytes());
        result
    }

    /// Render the flag byte as a padded `FSRPAUEC` string.
    pub fn flags_string(&self) -> String {
        const LETTERS: [(u8, char); 8] = [
            (tcp_flags::FIN, 'F'),
            (tcp_flags::SYN, 'S'),
            (tcp_flags::RST, 'R'),
            (tcp_flags::PSH, 'P'),
            (tcp_flags::ACK, 'A'),
            (tcp_flags::URG, 'U'),
            (tcp_flags::ECE, 'E'),
            (tcp_flags::CWR, 'C'),
        ];
        LETTERS
            .iter()
            .map(|&(bit, letter)| if self.flags & bit != 0 { letter } else { ' ' })
            .collect()
    }
}

/// Order used before the BLR pass: protocol number, then start time.
pub fn compare_proto_stime(a: &FlowRecord, b: &FlowRecord) -> Ordering {
    a.protocol_number
        .cmp(&b.protocol_number)
        .then(a.stime.cmp(&b.stime))
}

/// Order used for BLR metric extraction: destination IP, then source port.
///
/// The sport tie-break applies only to TCP events; UDP and ICMP events
/// compare by destination IP alone.
pub fn compare_dip_sport(a: &FlowRecord, b: &FlowRecord) -> Ordering {
    match a.dip_u32().cmp(&b.dip_u32()) {
        Ordering::Equal if a.protocol_number == FlowProtocol::Tcp.number() => {
            a.sport.cmp(&b.sport)
        }
        other => other,
    }
}
