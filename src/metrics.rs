//! Per-event metrics accumulated across the classifier chain.

use serde::Serialize;

use std::net::Ipv4Addr;

use crate::flow::FlowRecord;
use crate::protocol::FlowProtocol;

/// Number of buckets in the TCP flag histogram; flag bytes at or above the
/// last bucket collapse into it.
pub const MAX_FLAGS: usize = 64;

/// Terminal classification of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
pub enum EventClass {
    #[default]
    Unknown,
    Benign,
    Backscatter,
    Flood,
    Scan,
}

/// Which statistical model produced (or last touched) the event's verdict.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum ScanModel {
    #[default]
    Hybrid = 0,
    Trw = 1,
    Blr = 2,
}

impl ScanModel {
    pub fn number(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u32> for ScanModel {
    type Error = u32;

    fn try_from(item: u32) -> Result<Self, u32> {
        match item {
            0 => Ok(ScanModel::Hybrid),
            1 => Ok(ScanModel::Trw),
            2 => Ok(ScanModel::Blr),
            other => Err(other),
        }
    }
}

/// Derived metrics specific to ICMP events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct IcmpMetrics {
    pub max_class_c_subnet_run_length: u32,
    pub max_class_c_dip_run_length: u32,
    pub max_class_c_dip_count: u32,
    pub total_dip_count: u32,
    pub echo_ratio: f64,
}

/// Derived metrics specific to TCP events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TcpMetrics {
    pub noack_ratio: f64,
    pub small_ratio: f64,
    pub sp_dip_ratio: f64,
    pub payload_ratio: f64,
    pub unique_dip_ratio: f64,
    pub backscatter_ratio: f64,
}

/// Derived metrics specific to UDP events.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct UdpMetrics {
    pub small_ratio: f64,
    pub max_class_c_dip_run_length: u32,
    pub max_low_dp_hit: u32,
    pub max_low_port_run_length: u32,
    pub sp_dip_ratio: f64,
    pub payload_ratio: f64,
    pub unique_sp_ratio: f64,
}

/// Protocol-specific metric block, one variant per supported protocol.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ProtoMetrics {
    Icmp(IcmpMetrics),
    Tcp(TcpMetrics),
    Udp(UdpMetrics),
}

impl ProtoMetrics {
    fn new(protocol: FlowProtocol) -> Self {
        match protocol {
            FlowProtocol::Icmp => ProtoMetrics::Icmp(IcmpMetrics::default()),
            FlowProtocol::Tcp => ProtoMetrics::Tcp(TcpMetrics::default()),
            FlowProtocol::Udp => ProtoMetrics::Udp(UdpMetrics::default()),
        }
    }
}

/// Everything the pipeline accumulates about one event.
#[derive(Debug, Clone)]
pub struct EventMetrics {
    pub protocol: FlowProtocol,
    pub sip: Ipv4Addr,
    pub event_size: u32,

    /// Earliest start time over member flows, seconds.
    pub stime: u32,
    /// Latest end time over member flows, seconds.
    pub etime: u32,

    /// Distinct source ports seen on the current destination IP.
    pub sp_count: u32,
    /// Distinct (destination IP, destination port) pairs.
    pub unique_dsts: u32,
    /// Distinct destination IPs.
    pub unique_dips: u32,

    pub bytes: u64,
    pub pkts: u64,

    /// Distinct source ports over the whole event (UDP extractor).
    pub unique_sp_count: u32,

    pub flows_noack: u32,
    pub flows_small: u32,
    pub flows_with_payload: u32,
    pub flows_backscatter: u32,
    pub flows_icmp_echo: u32,

    pub tcp_flag_counts: [u32; MAX_FLAGS],

    pub proto: ProtoMetrics,

    pub event_class: EventClass,
    pub scan_probability: f64,
    pub model: ScanModel,
}

impl EventMetrics {
    pub fn new(sip: Ipv4Addr, protocol: FlowProtocol, stime: u32, etime: u32) -> Self {
        Self {
            protocol,
            sip,
            event_size: 0,
            stime,
            etime,
            sp_count: 0,
            unique_dsts: 0,
            unique_dips: 0,
            bytes: 0,
            pkts: 0,
            unique_sp_count: 0,
            flows_noack: 0,
            flows_small: 0,
            flows_with_payload: 0,
            flows_backscatter: 0,
            flows_icmp_echo: 0,
            tcp_flag_counts: [0; MAX_FLAGS],
            proto: ProtoMetrics::new(protocol),
            event_class: EventClass::Unknown,
            scan_probability: 0.0,
            model: ScanModel::Hybrid,
        }
    }

    pub fn icmp(&self) -> &IcmpMetrics {
        match &self.proto {
            ProtoMetrics::Icmp(m) => m,
            _ => unreachable!("ICMP metrics requested for a non-ICMP event"),
        }
    }

    pub fn tcp(&self) -> &TcpMetrics {
        match &self.proto {
            ProtoMetrics::Tcp(m) => m,
            _ => unreachable!("TCP metrics requested for a non-TCP event"),
        }
    }

    pub fn udp(&self) -> &UdpMetrics {
        match &self.proto {
            ProtoMetrics::Udp(m) => m,
            _ => unreachable!("UDP metrics requested for a non-UDP event"),
        }
    }

    pub fn icmp_mut(&mut self) -> &mut IcmpMetrics {
        match &mut self.proto {
            ProtoMetrics::Icmp(m) => m,
            _ => unreachable!("ICMP metrics requested for a non-ICMP event"),
        }
    }

    pub fn tcp_mut(&mut self) -> &mut TcpMetrics {
        match &mut self.proto {
            ProtoMetrics::Tcp(m) => m,
            _ => unreachable!("TCP metrics requested for a non-TCP event"),
        }
    }

    pub fn udp_mut(&mut self) -> &mut UdpMetrics {
        match &mut self.proto {
            ProtoMetrics::Udp(m) => m,
            _ => unreachable!("UDP metrics requested for a non-UDP event"),
        }
    }

    /// Bucket a flag byte into the histogram.
    pub fn add_flag_count(&mut self, value: u8) {
        let idx = (value as usize).min(MAX_FLAGS - 1);
        self.tcp_flag_counts[idx] += 1;
    }
}

/// Totals and uniqueness counters shared by every protocol's extractor.
///
/// Expects `flows` sorted by destination IP (with whatever tie-break the
/// caller's model requires); `sp_count` tracks source-port variety within
/// the run of the final destination IP.
pub fn calculate_shared_metrics(flows: &[FlowRecord], metrics: &mut EventMetrics) {
    metrics.sp_count = 1;
    metrics.unique_dips = 1;
    metrics.unique_dsts = 0;

    let mut last_dip = flows[0].dip_u32();
    let mut last_sp = flows[0].sport;
    let mut last_dp = u32::MAX;

    for rec in flows {
        metrics.pkts += u64::from(rec.pkts);
        metrics.bytes += u64::from(rec.bytes);

        if rec.dip_u32() == last_dip {
            if rec.sport != last_sp {
                metrics.sp_count += 1;
            }
        } else {
            metrics.sp_count = 1;
            metrics.unique_dips += 1;
        }
        if rec.dip_u32() != last_dip || u32::from(rec.dport) != last_dp {
            metrics.unique_dsts += 1;
        }

        last_sp = rec.sport;
        last_dp = u32::from(rec.dport);
        last_dip = rec.dip_u32();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(dip: [u8; 4], sport: u16, dport: u16, pkts: u32, bytes: u32) -> FlowRecord {
        FlowRecord {
            sip: Ipv4Addr::new(10, 0, 0, 1),
            dip: Ipv4Addr::from(dip),
            sport,
            dport,
            protocol_number: 6,
            flags: 0,
            icmp_type: 0,
            icmp_code: 0,
            pkts,
            bytes,
            stime: 0,
            etime: 0,
        }
    }

    fn fresh(protocol: FlowProtocol, n: u32) -> EventMetrics {
        let mut m = EventMetrics::new(Ipv4Addr::new(10, 0, 0, 1), protocol, 0, 0);
        m.event_size = n;
        m
    }

    #[test]
    fn shared_metrics_count_totals_and_uniqueness() {
        let flows = vec![
            flow([192, 0, 2, 1], 1000, 80, 2, 100),
            flow([192, 0, 2, 1], 1001, 80, 1, 40),
            flow([192, 0, 2, 1], 1001, 443, 1, 40),
            flow([192, 0, 2, 2], 1002, 80, 3, 180),
        ];
        let mut metrics = fresh(FlowProtocol::Tcp, flows.len() as u32);
        calculate_shared_metrics(&flows, &mut metrics);

        assert_eq!(metrics.pkts, 7);
        assert_eq!(metrics.bytes, 360);
        assert_eq!(metrics.unique_dips, 2);
        // dip+dport pairs: (.1,80), (.1,443), (.2,80)
        assert_eq!(metrics.unique_dsts, 3);
        // counter resets on the dip change; only .2's run remains
        assert_eq!(metrics.sp_count, 1);
    }

    #[test]
    fn sp_count_tracks_final_destination_run() {
        let flows = vec![
            flow([192, 0, 2, 9], 5, 80, 1, 40),
            flow([192, 0, 2, 9], 6, 80, 1, 40),
            flow([192, 0, 2, 9], 7, 80, 1, 40),
        ];
        let mut metrics = fresh(FlowProtocol::Tcp, 3);
        calculate_shared_metrics(&flows, &mut metrics);
        assert_eq!(metrics.sp_count, 3);
        assert_eq!(metrics.unique_dips, 1);
        assert_eq!(metrics.unique_dsts, 1);
    }

    #[test]
    fn single_flow_event() {
        let flows = vec![flow([198, 51, 100, 1], 1234, 53, 1, 60)];
        let mut metrics = fresh(FlowProtocol::Tcp, 1);
        calculate_shared_metrics(&flows, &mut metrics);
        assert_eq!(metrics.unique_dips, 1);
        assert_eq!(metrics.unique_dsts, 1);
        assert_eq!(metrics.sp_count, 1);
    }

    #[test]
    fn flag_histogram_saturates_at_last_bucket() {
        let mut metrics = fresh(FlowProtocol::Tcp, 0);
        metrics.add_flag_count(2);
        metrics.add_flag_count(63);
        metrics.add_flag_count(200);
        assert_eq!(metrics.tcp_flag_counts[2], 1);
        assert_eq!(metrics.tcp_flag_counts[63], 2);
    }

    #[test]
    fn proto_block_matches_protocol() {
        let metrics = fresh(FlowProtocol::Udp, 0);
        assert!(matches!(metrics.proto, ProtoMetrics::Udp(_)));
        let metrics = fresh(FlowProtocol::Icmp, 0);
        assert!(matches!(metrics.proto, ProtoMetrics::Icmp(_)));
    }

    #[test]
    fn scan_model_numbers() {
        assert_eq!(ScanModel::try_from(0), Ok(ScanModel::Hybrid));
        assert_eq!(ScanModel::try_from(1), Ok(ScanModel::Trw));
        assert_eq!(ScanModel::try_from(2), Ok(ScanModel::Blr));
        assert_eq!(ScanModel::try_from(3), Err(3));
        assert_eq!(ScanModel::Blr.number(), 2);
    }
}
