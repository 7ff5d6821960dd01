//! # MSS Clamping
//!
//! Lowers the TCP maximum-segment-size option in SYN segments that travel
//! through the tunnel so that the peers never build segments which, once
//! encapsulated, exceed the configured link size.
//!
//! The checksum is patched incrementally (RFC 1624) instead of being
//! recomputed. Packets that do not parse cleanly are left untouched.

use crate::core::frame::{calculate_payload_overhead, calculate_protocol_header_size, Frame, FrameOptions};
use crate::utils::crypto::CipherParams;
use tracing::debug;

const IPV4_HEADER_MIN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const TCP_HEADER_LEN: usize = 20;

const IPPROTO_TCP: u8 = 6;
const IP_OFFMASK: u16 = 0x1fff;
const TCPH_SYN_MASK: u8 = 0x02;

const TCPOPT_EOL: u8 = 0;
const TCPOPT_NOP: u8 = 1;
const TCPOPT_MAXSEG: u8 = 2;
const TCPOLEN_MAXSEG: usize = 4;

/// IPv4 plus TCP header without options
const IP_TCP_OVERHEAD: usize = 20 + 20;

/// Compute `frame.mss_fix` from the configured `mssfix` link target.
///
/// The MSS is derived liberally: only the IPv4 and TCP base headers are
/// subtracted from the payload budget. IPv6 packets get another 20 bytes
/// taken off in [`mss_fixup_ipv6`]. A zero `mssfix` leaves the frame alone.
pub fn calculate_mssfix<K: CipherParams + ?Sized>(frame: &mut Frame, kt: &K, opts: &FrameOptions) {
    if opts.mssfix == 0 {
        return;
    }

    let overhead = calculate_protocol_header_size(kt, opts, false);
    let payload_overhead = calculate_payload_overhead(frame, opts, kt, true) + IP_TCP_OVERHEAD;

    let target = opts.mssfix.saturating_sub(overhead);
    frame.mss_fix = adjust_payload_max_cbc(kt, target).saturating_sub(payload_overhead);
}

/// CBC ciphertext is a whole number of blocks and needs at least one byte
/// of padding, so the usable target shrinks accordingly.
fn adjust_payload_max_cbc<K: CipherParams + ?Sized>(kt: &K, target: usize) -> usize {
    if !kt.cipher_mode().is_cbc() {
        return target;
    }
    let block_size = kt.block_size().max(1);
    (target - target % block_size).saturating_sub(1)
}

/// Clamp the MSS of a TCP SYN carried in an IPv4 packet
pub fn mss_fixup_ipv4(packet: &mut [u8], maxmss: u16) {
    if packet.len() < IPV4_HEADER_MIN {
        return;
    }

    let hlen = ((packet[0] & 0x0f) as usize) * 4;
    let tot_len = u16::from_be_bytes([packet[2], packet[3]]) as usize;
    let frag_off = u16::from_be_bytes([packet[6], packet[7]]);

    if packet[9] == IPPROTO_TCP
        && tot_len == packet.len()
        && frag_off & IP_OFFMASK == 0
        && hlen <= packet.len()
        && packet.len() - hlen >= TCP_HEADER_LEN
    {
        let tcp = &mut packet[hlen..];
        if tcp[13] & TCPH_SYN_MASK != 0 {
            mss_fixup_dowork(tcp, maxmss);
        }
    }
}

/// Clamp the MSS of a TCP SYN carried in an IPv6 packet.
///
/// Only a TCP header directly after the fixed IPv6 header is handled;
/// extension header chains are not walked.
pub fn mss_fixup_ipv6(packet: &mut [u8], maxmss: u16) {
    if packet.len() < IPV6_HEADER_LEN {
        return;
    }

    let payload_len = u16::from_be_bytes([packet[4], packet[5]]) as usize;
    if packet.len() != payload_len + IPV6_HEADER_LEN {
        return;
    }

    if packet[6] != IPPROTO_TCP {
        return;
    }

    let tcp = &mut packet[IPV6_HEADER_LEN..];
    if tcp.len() >= TCP_HEADER_LEN && tcp[13] & TCPH_SYN_MASK != 0 {
        mss_fixup_dowork(tcp, maxmss.saturating_sub(20));
    }
}

/// Rewrite the MSS option of a TCP segment if it exceeds `maxmss`
pub fn mss_fixup_dowork(tcp: &mut [u8], maxmss: u16) {
    if tcp.len() < TCP_HEADER_LEN {
        return;
    }

    let hlen = ((tcp[12] & 0xf0) >> 2) as usize;
    if hlen <= TCP_HEADER_LEN || hlen > tcp.len() {
        return;
    }

    let mut pos = TCP_HEADER_LEN;
    let mut olen = hlen - TCP_HEADER_LEN;

    while olen > 1 {
        let optlen = match tcp[pos] {
            TCPOPT_EOL => break,
            TCPOPT_NOP => 1,
            kind => {
                let optlen = tcp[pos + 1] as usize;
                if optlen == 0 || optlen > olen {
                    break;
                }
                if kind == TCPOPT_MAXSEG && optlen == TCPOLEN_MAXSEG {
                    let mssval = u16::from_be_bytes([tcp[pos + 2], tcp[pos + 3]]);
                    if mssval > maxmss {
                        debug!(from = mssval, to = maxmss, "MSS clamped");
                        tcp[pos + 2..pos + 4].copy_from_slice(&maxmss.to_be_bytes());
                        let check = u16::from_be_bytes([tcp[16], tcp[17]]);
                        let accumulate = mssval as i32 - maxmss as i32;
                        tcp[16..18].copy_from_slice(&adjust_checksum(accumulate, check).to_be_bytes());
                    }
                }
                optlen
            }
        };
        olen -= optlen;
        pos += optlen;
    }
}

/// Incremental ones-complement checksum update
fn adjust_checksum(accumulate: i32, check: u16) -> u16 {
    let mut acc = accumulate + check as i32;
    if acc < 0 {
        acc = -acc;
        acc = (acc >> 16) + (acc & 0xffff);
        acc += acc >> 16;
        !(acc as u16)
    } else {
        acc = (acc >> 16) + (acc & 0xffff);
        acc += acc >> 16;
        acc as u16
    }
}
