use serde::Serialize;

/// IP protocols in which scan detection is supported.
///
/// Flow records carrying any other protocol number are counted as ignored
/// and never enter the event pipeline.
#[repr(u8)]
#[derive(Debug, PartialEq, Eq, Clone, Copy, PartialOrd, Ord, Hash, Serialize)]
pub enum FlowProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

impl FlowProtocol {
    /// The IANA protocol number.
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for FlowProtocol {
    type Error = u8;

    fn try_from(item: u8) -> Result<Self, u8> {
        match item {
            1 => Ok(FlowProtocol::Icmp),
            6 => Ok(FlowProtocol::Tcp),
            17 => Ok(FlowProtocol::Udp),
            other => Err(other),
        }
    }
}
