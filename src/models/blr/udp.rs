//! UDP feature extraction and scoring.
//!
//! Alongside the /24 run lengths, the UDP extractor watches two bitmaps:
//! a 1024-bit map of privileged destination ports, rescanned and reset at
//! every destination-IP change, and a 65536-bit map of source ports over
//! the whole event.

use crate::bitmap::Bitmap;
use crate::flow::FlowRecord;
use crate::metrics::{EventClass, EventMetrics, calculate_shared_metrics};
use crate::models::blr::{PACKET_PAYLOAD_CUTOFF, SMALL_PKT_CUTOFF, logistic};
use crate::verbose::Verbose;

pub const BETA0: f64 = -1.887907966;
pub const BETA4: f64 = 0.543683505;
pub const BETA5: f64 = 0.025150994;
pub const BETA8: f64 = 0.529094801;
pub const BETA10: f64 = -1.244182168;
pub const BETA13: f64 = -0.001841634;
pub const BETA15: f64 = -0.224548546;
pub const BETA20: f64 = -0.697943155;

const LOW_PORT_LIMIT: u32 = 1024;

pub fn increment_counters(rec: &FlowRecord, metrics: &mut EventMetrics) {
    if rec.pkts < SMALL_PKT_CUTOFF {
        metrics.flows_small += 1;
    }
    if rec.bytes_per_pkt() > PACKET_PAYLOAD_CUTOFF {
        metrics.flows_with_payload += 1;
    }
}

pub fn calculate_metrics(flows: &[FlowRecord], metrics: &mut EventMetrics, verbose: &Verbose) {
    let mut low_dp_bitmap = Bitmap::new(LOW_PORT_LIMIT);
    let mut sp_bitmap = Bitmap::new(1 << 16);

    calculate_shared_metrics(flows, metrics);

    let n = flows.len();
    low_dp_bitmap.set(u32::from(flows[0].dport));
    let mut dip_next = flows[0].dip_u32();
    let mut class_c_next = dip_next & 0xFFFF_FF00;

    let mut subnet_run: u32 = 1;
    let mut max_subnet_run: u32 = 1;
    let mut max_class_c_dip_run_length: u32 = 0;
    let mut max_low_dp_hit: u32 = 0;
    let mut max_low_port_run_length: u32 = 0;

    for i in 0..n {
        let rec = &flows[i];
        sp_bitmap.set(u32::from(rec.sport));

        let dip_curr = dip_next;
        let class_c_curr = class_c_next;

        if i + 1 == n {
            // Synthetic "next" values force the final bitmap scan and the
            // final subnet-run flush below.
            dip_next = dip_curr.wrapping_sub(1);
            class_c_next = class_c_curr.wrapping_sub(0x100);
            if subnet_run > max_subnet_run {
                max_subnet_run = subnet_run;
            }
        } else {
            let next = &flows[i + 1];
            dip_next = next.dip_u32();
            class_c_next = dip_next & 0xFFFF_FF00;

            if dip_curr == dip_next {
                low_dp_bitmap.set(u32::from(next.dport));
            } else if class_c_curr == class_c_next {
                if dip_next.wrapping_sub(dip_curr) == 1 {
                    subnet_run += 1;
                } else if subnet_run > max_subnet_run {
                    max_subnet_run = subnet_run;
                    subnet_run = 1;
                }
            }
        }

        if dip_curr != dip_next {
            // Longest consecutive run of privileged ports hit on this dip.
            let mut port_run: u32 = 0;
            for port in 0..LOW_PORT_LIMIT {
                if low_dp_bitmap.get(port) {
                    port_run += 1;
                } else if port_run > 0 {
                    if port_run > max_low_port_run_length {
                        max_low_port_run_length = port_run;
                    }
                    port_run = 0;
                }
            }

            let low_dp_hit = low_dp_bitmap.count();
            if low_dp_hit > max_low_dp_hit {
                max_low_dp_hit = low_dp_hit;
            }

            low_dp_bitmap.clear();
            low_dp_bitmap.set(u32::from(rec.dport));
        }

        if class_c_curr != class_c_next {
            if max_subnet_run > max_class_c_dip_run_length {
                max_class_c_dip_run_length = max_subnet_run;
            }
            max_subnet_run = 1;
        }
    }

    metrics.unique_sp_count = sp_bitmap.count();

    let size = f64::from(metrics.event_size);
    let small_ratio = f64::from(metrics.flows_small) / size;
    let sp_dip_ratio = f64::from(metrics.sp_count) / f64::from(metrics.unique_dsts);
    let payload_ratio = f64::from(metrics.flows_with_payload) / size;
    let unique_sp_ratio = f64::from(metrics.unique_sp_count) / size;
    let event_size = metrics.event_size;

    let udp = metrics.udp_mut();
    udp.small_ratio = small_ratio;
    udp.max_class_c_dip_run_length = max_class_c_dip_run_length;
    udp.max_low_dp_hit = max_low_dp_hit;
    udp.max_low_port_run_length = max_low_port_run_length;
    udp.sp_dip_ratio = sp_dip_ratio;
    udp.payload_ratio = payload_ratio;
    udp.unique_sp_ratio = unique_sp_ratio;

    verbose.result(
        event_size,
        &format!(
            "\tudp ({:.3}, {}, {}, {}, {:.3}, {:.3}, {:.3})",
            small_ratio,
            max_class_c_dip_run_length,
            max_low_dp_hit,
            max_low_port_run_length,
            sp_dip_ratio,
            payload_ratio,
            unique_sp_ratio
        ),
    );
}

pub fn calculate_scan_probability(metrics: &mut EventMetrics) {
    let udp = metrics.udp();
    let y = BETA0
        + BETA4 * udp.small_ratio
        + BETA5 * f64::from(udp.max_class_c_dip_run_length)
        + BETA8 * f64::from(udp.max_low_dp_hit)
        + BETA10 * f64::from(udp.max_low_port_run_length)
        + BETA13 * udp.sp_dip_ratio
        + BETA15 * udp.payload_ratio
        + BETA20 * udp.unique_sp_ratio;

    metrics.scan_probability = logistic(y);
    if metrics.scan_probability > 0.5 {
        metrics.event_class = EventClass::Scan;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScanConfig;
    use crate::protocol::FlowProtocol;
    use std::net::Ipv4Addr;

    fn udp_flow(dip: Ipv4Addr, sport: u16, dport: u16, pkts: u32, bytes: u32) -> FlowRecord {
        FlowRecord {
            sip: Ipv4Addr::new(10, 0, 0, 11),
            dip,
            sport,
            dport,
            protocol_number: 17,
            flags: 0,
            icmp_type: 0,
            icmp_code: 0,
            pkts,
            bytes,
            stime: 0,
            etime: 0,
        }
    }

    fn extract(flows: Vec<FlowRecord>) -> EventMetrics {
        let mut metrics = EventMetrics::new(flows[0].sip, FlowProtocol::Udp, 0, 0);
        metrics.event_size = flows.len() as u32;
        for rec in &flows {
            increment_counters(rec, &mut metrics);
        }
        let verbose = Verbose::from_config(&ScanConfig::default());
        calculate_metrics(&flows, &mut metrics, &verbose);
        metrics
    }

    #[test]
    fn port_sweep_of_one_destination() {
        // Probe privileged ports 10..=29 on one destination.
        let flows: Vec<_> = (10..30)
            .map(|p| udp_flow(Ipv4Addr::new(192, 0, 2, 50), 40000, p, 1, 30))
            .collect();
        let metrics = extract(flows);
        let udp = metrics.udp();
        assert_eq!(udp.max_low_dp_hit, 20);
        assert_eq!(udp.max_low_port_run_length, 20);
        assert_eq!(metrics.unique_sp_count, 1);
        assert_eq!(udp.small_ratio, 1.0);
    }

    #[test]
    fn consecutive_dip_run_in_one_subnet() {
        let flows: Vec<_> = (1..=50)
            .map(|i| udp_flow(Ipv4Addr::new(192, 0, 2, i), 40000, 53, 1, 30))
            .collect();
        let metrics = extract(flows);
        let udp = metrics.udp();
        assert_eq!(udp.max_class_c_dip_run_length, 50);
        // per-dip privileged hits never exceed the seeded pair
        assert!(udp.max_low_dp_hit <= 2);
    }

    #[test]
    fn gapped_dips_limit_the_run() {
        let flows = vec![
            udp_flow(Ipv4Addr::new(192, 0, 2, 1), 1, 53, 1, 30),
            udp_flow(Ipv4Addr::new(192, 0, 2, 2), 2, 53, 1, 30),
            udp_flow(Ipv4Addr::new(192, 0, 2, 3), 3, 53, 1, 30),
            udp_flow(Ipv4Addr::new(192, 0, 2, 200), 4, 53, 1, 30),
        ];
        let metrics = extract(flows);
        assert_eq!(metrics.udp().max_class_c_dip_run_length, 3);
        assert_eq!(metrics.unique_sp_count, 4);
    }

    #[test]
    fn trailing_low_port_run_at_map_edge_is_not_flushed() {
        // A run ending exactly at port 1023 never sees a clear bit, so the
        // scan loop leaves it uncounted. Pin that quirk.
        let flows: Vec<_> = (1014..1024)
            .map(|p| udp_flow(Ipv4Addr::new(192, 0, 2, 60), 40000, p, 1, 30))
            .collect();
        let metrics = extract(flows);
        let udp = metrics.udp();
        assert_eq!(udp.max_low_dp_hit, 10);
        assert_eq!(udp.max_low_port_run_length, 0);
    }

    #[test]
    fn dns_style_traffic_scores_low() {
        let flows: Vec<_> = (0..40)
            .map(|i| {
                udp_flow(
                    Ipv4Addr::new(198, 51, 100, 3),
                    49152 + i,
                    53,
                    4,
                    800,
                )
            })
            .collect();
        let mut metrics = extract(flows);
        calculate_scan_probability(&mut metrics);
        assert!(metrics.scan_probability < 0.5);
        assert_eq!(metrics.event_class, EventClass::Unknown);
    }

    #[test]
    fn low_port_sweep_scores_as_scan() {
        // Many privileged-port hits on each destination dominate the score.
        let mut flows = Vec::new();
        for dip in 1..=4u8 {
            for port in 0..16u16 {
                flows.push(udp_flow(
                    Ipv4Addr::new(192, 0, 2, dip),
                    40000,
                    port * 7 + 1,
                    1,
                    30,
                ));
            }
        }
        let mut metrics = extract(flows);
        calculate_scan_probability(&mut metrics);
        assert!(metrics.udp().max_low_dp_hit >= 16);
        assert!(metrics.scan_probability > 0.5);
        assert_eq!(metrics.event_class, EventClass::Scan);
    }
}
