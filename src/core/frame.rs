//! # Frame Geometry
//!
//! Packet-geometry accounting: how many bytes each processing layer may add
//! around a payload, and the buffer sizes and offsets that follow from it.
//!
//! A [`Frame`] starts empty, every layer registers its worst-case overhead
//! through the `add_to_*` accumulators, and [`Frame::finalize`] fixes the
//! link MTU once. After that only `link_mtu_dynamic` moves.
//!
//! ```text
//!  link_mtu
//!  |<------------------------------------------------------->|
//!  [ extra_frame (crypto, opcode) ][ extra_tun ][ tun payload ]
//!  |<---------- tun_link_delta ------------->|
//! ```
//!
//! All functions are pure arithmetic over trusted configuration and have no
//! failure path.

use crate::utils::crypto::CipherParams;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use tracing::{debug, warn};

/// Standard Ethernet MTU
pub const ETHERNET_MTU: usize = 1500;

/// Smallest tunnel MTU a finalized frame should allow
pub const TUN_MTU_MIN: usize = 100;

pub const LINK_MTU_DEFAULT: usize = 1500;

pub const TUN_MTU_DEFAULT: usize = 1500;

/// Default excess over the tap MTU (Ethernet header plus tags)
pub const TAP_MTU_EXTRA_DEFAULT: usize = 32;

pub const MSSFIX_DEFAULT: usize = 1450;

/// Payload start alignment inside a buffer
pub const PAYLOAD_ALIGN: usize = 4;

/// Size of the control-channel working buffer
pub const TLS_CHANNEL_BUF_SIZE: usize = 2048;

/// Smallest control-channel MTU
pub const TLS_CHANNEL_MTU_MIN: usize = 512;

/// Bytes added by a short-form packet id
pub const PACKET_ID_SIZE_SHORT: usize = 4;

/// Bytes added by a long-form (id + timestamp) packet id
pub const PACKET_ID_SIZE_LONG: usize = 8;

/// Size of a packet id on the wire
pub fn packet_id_size(long_form: bool) -> usize {
    if long_form {
        PACKET_ID_SIZE_LONG
    } else {
        PACKET_ID_SIZE_SHORT
    }
}

/// Which side of the tunnel the user configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MtuSpec {
    /// Explicit transport (link) MTU
    Link(usize),
    /// Explicit tunnel-device MTU
    Tun(usize),
}

/// Flags for [`Frame::set_mtu_dynamic`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MtuFlags(u8);

impl MtuFlags {
    pub const NONE: MtuFlags = MtuFlags(0);
    /// Interpret the value as a tunnel-side MTU
    pub const TUN: MtuFlags = MtuFlags(1 << 0);
    /// Only ever decrease the dynamic MTU
    pub const UPPER_BOUND: MtuFlags = MtuFlags(1 << 1);

    pub fn contains(self, other: MtuFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MtuFlags {
    type Output = MtuFlags;

    fn bitor(self, rhs: MtuFlags) -> MtuFlags {
        MtuFlags(self.0 | rhs.0)
    }
}

/// Packet-geometry record
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Frame {
    /// Maximum packet size sent over the external transport
    pub link_mtu: usize,

    /// MSS value written into clamped TCP SYN segments (IPv4 basis)
    pub mss_fix: usize,

    /// Runtime-adjusted link MTU, never above `link_mtu`
    pub link_mtu_dynamic: usize,

    /// Maximum bytes all processing steps together may prepend
    pub extra_frame: usize,

    /// Maximum expansion of the internal work buffer (compression worst case)
    pub extra_buffer: usize,

    /// Bytes in excess of the tunnel-device MTU that may be read or written
    pub extra_tun: usize,

    /// Bytes in excess of the transport MTU (peer-id, socks UDP header)
    pub extra_link: usize,
}

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame is configured once it has a link MTU
    pub fn is_defined(&self) -> bool {
        self.link_mtu > 0
    }

    pub fn add_to_link_mtu(&mut self, increment: usize) {
        self.link_mtu += increment;
    }

    pub fn add_to_extra_frame(&mut self, increment: usize) {
        self.extra_frame += increment;
    }

    pub fn remove_from_extra_frame(&mut self, decrement: usize) {
        self.extra_frame = self.extra_frame.saturating_sub(decrement);
    }

    pub fn add_to_extra_tun(&mut self, increment: usize) {
        self.extra_tun += increment;
    }

    pub fn add_to_extra_link(&mut self, increment: usize) {
        self.extra_link += increment;
    }

    pub fn add_to_extra_buffer(&mut self, increment: usize) {
        self.extra_buffer += increment;
    }

    /// Derive `link_mtu` from whichever MTU the user configured.
    ///
    /// Sets `link_mtu_dynamic` to the new link MTU. A tunnel MTU below
    /// [`TUN_MTU_MIN`] is reported but not corrected; rejecting it is the
    /// configuration layer's job.
    pub fn finalize(&mut self, mtu: MtuSpec) {
        self.link_mtu = match mtu {
            MtuSpec::Tun(tun_mtu) => tun_mtu + self.tun_link_delta(),
            MtuSpec::Link(link_mtu) => link_mtu,
        };

        if self.link_mtu < TUN_MTU_MIN + self.tun_link_delta() {
            warn!(
                tun_mtu = self.link_mtu as i64 - self.tun_link_delta() as i64,
                minimum = TUN_MTU_MIN,
                frame = %self,
                "TUN MTU is too small"
            );
        }

        self.link_mtu_dynamic = self.link_mtu;
    }

    /// Undo another frame's `extra_frame` accounting.
    ///
    /// The bytes move from `extra_frame` to `extra_tun`, so the tun/link
    /// delta is unchanged.
    pub fn subtract_extra(&mut self, src: &Frame) {
        self.extra_frame = self.extra_frame.saturating_sub(src.extra_frame);
        self.extra_tun += src.extra_frame;
    }

    /// Set the dynamic link MTU.
    ///
    /// With [`MtuFlags::UPPER_BOUND`] the value can only decrease; with
    /// [`MtuFlags::TUN`] `mtu` is a tunnel-side size. The result is clamped
    /// into `[expanded_size_min, link_mtu]`.
    pub fn set_mtu_dynamic(&mut self, mtu: usize, flags: MtuFlags) {
        let orig_link_mtu_dynamic = self.link_mtu_dynamic;

        let mut target = mtu;
        if flags.contains(MtuFlags::TUN) {
            target += self.tun_link_delta();
        }

        if !flags.contains(MtuFlags::UPPER_BOUND) || target < self.link_mtu_dynamic {
            let min = self.expanded_size_min();
            let max = self.expanded_size().max(min);
            self.link_mtu_dynamic = target.clamp(min, max);
        }

        debug!(
            mtu,
            flags = flags.0,
            from = orig_link_mtu_dynamic,
            to = self.link_mtu_dynamic,
            "MTU DYNAMIC"
        );
    }

    /// Largest overhead any stage prepends
    pub fn extra(&self) -> usize {
        self.extra_frame
    }

    pub fn tun_link_delta(&self) -> usize {
        self.extra_frame + self.extra_tun
    }

    /// Configured tunnel-device MTU
    pub fn tun_mtu_size(&self) -> usize {
        self.link_mtu.saturating_sub(self.tun_link_delta())
    }

    pub fn payload_size(&self) -> usize {
        self.link_mtu.saturating_sub(self.extra_frame)
    }

    pub fn payload_size_dynamic(&self) -> usize {
        self.link_mtu_dynamic.saturating_sub(self.extra_frame)
    }

    pub fn expanded_size(&self) -> usize {
        self.link_mtu
    }

    pub fn expanded_size_dynamic(&self) -> usize {
        self.link_mtu_dynamic
    }

    pub fn expanded_size_min(&self) -> usize {
        TUN_MTU_MIN + self.tun_link_delta()
    }

    /// Largest read/write on the tunnel device
    pub fn max_rw_size_tun(&self) -> usize {
        self.payload_size()
    }

    /// Largest read/write on the transport
    pub fn max_rw_size_link(&self) -> usize {
        self.expanded_size() + self.extra_link
    }

    /// Unaligned space reserved on each side of the payload
    pub fn headroom_base(&self) -> usize {
        self.tun_link_delta() + self.extra_buffer + self.extra_link
    }

    /// Offset where payload starts inside a buffer: the tun/link delta
    /// rounded up to [`PAYLOAD_ALIGN`].
    pub fn headroom(&self) -> usize {
        let offset = self.tun_link_delta();
        let delta = offset.wrapping_neg() & (PAYLOAD_ALIGN - 1);
        offset + delta
    }

    /// Buffer size for one packet. The headroom is counted twice because
    /// the split between space before and after the payload is not tracked.
    pub fn buf_size(&self) -> usize {
        self.tun_mtu_size() + self.headroom_base() * 2
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[ L:{} D:{} EF:{} EB:{} ET:{} EL:{} ]",
            self.link_mtu,
            self.link_mtu_dynamic,
            self.extra_frame,
            self.extra_buffer,
            self.extra_tun,
            self.extra_link
        )
    }
}

/// Transport protocol of the outer connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProto {
    #[default]
    Udp,
    Tcp,
}

/// The option values frame sizing depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOptions {
    pub proto: TransportProto,
    /// UDP traffic relayed through a socks proxy (10 byte header)
    pub socks_proxy: bool,
    /// TLS client or server mode (opcode byte on every packet)
    pub tls_mode: bool,
    /// Data packets carry a 3-byte peer id after the opcode
    pub use_peer_id: bool,
    /// Replay protection enabled (packet ids on data packets)
    pub replay: bool,
    /// A compression framing byte is present
    pub compression: bool,
    /// Fragmentation header present
    pub fragment: bool,
    pub tun_mtu: usize,
    /// Target link size for MSS clamping, 0 disables
    pub mssfix: usize,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            proto: TransportProto::Udp,
            socks_proxy: false,
            tls_mode: true,
            use_peer_id: true,
            replay: true,
            compression: false,
            fragment: false,
            tun_mtu: TUN_MTU_DEFAULT,
            mssfix: MSSFIX_DEFAULT,
        }
    }
}

impl FrameOptions {
    /// Packet id bytes carried by every data packet
    pub fn data_packet_id_size<K: CipherParams + ?Sized>(&self, kt: &K) -> usize {
        if !self.replay {
            return 0;
        }
        let long_form = !self.tls_mode || kt.cipher_mode().is_ofb_cfb();
        packet_id_size(long_form)
    }
}

/// Per-packet crypto overhead outside the encrypted payload.
///
/// In CBC mode the packet id is encrypted with the payload and is accounted
/// in [`calculate_payload_overhead`] instead. The IV is counted for CBC, and
/// for every cipher when `occ` asks for the options-string link MTU.
pub fn calculate_crypto_overhead<K: CipherParams + ?Sized>(
    kt: &K,
    pkt_id_size: usize,
    occ: bool,
) -> usize {
    let mode = kt.cipher_mode();
    let mut overhead = 0;

    if !mode.is_cbc() {
        overhead += pkt_id_size;
    }

    if mode.is_aead() {
        overhead += kt.tag_size();
    } else if kt.cipher_defined() {
        overhead += kt.digest_size();
        if occ || mode.is_cbc() {
            overhead += kt.iv_size();
        }
    } else {
        overhead += kt.digest_size();
    }

    overhead
}

/// Size of the protocol header in front of the payload.
///
/// Padding and block rounding are left to the caller.
pub fn calculate_protocol_header_size<K: CipherParams + ?Sized>(
    kt: &K,
    opts: &FrameOptions,
    occ: bool,
) -> usize {
    let mut header_size = 0;

    if opts.socks_proxy && opts.proto == TransportProto::Udp {
        header_size += 10;
    }

    // stream transports carry a 16 bit length field
    if opts.proto == TransportProto::Tcp {
        header_size += 2;
    }

    if opts.tls_mode {
        header_size += if opts.use_peer_id { 4 } else { 1 };
    }

    header_size += calculate_crypto_overhead(kt, opts.data_packet_id_size(kt), occ);
    header_size
}

/// Bytes a payload grows by ahead of encryption
pub fn calculate_payload_overhead<K: CipherParams + ?Sized>(
    frame: &Frame,
    opts: &FrameOptions,
    kt: &K,
    extra_tun: bool,
) -> usize {
    let mut overhead = 0;

    if extra_tun {
        overhead += frame.extra_tun;
    }
    if opts.compression {
        overhead += 1;
    }
    if opts.fragment {
        overhead += 4;
    }
    if kt.cipher_mode().is_cbc() {
        overhead += opts.data_packet_id_size(kt);
    }

    overhead
}

/// Largest plaintext a data packet may carry
pub fn calculate_payload_size<K: CipherParams + ?Sized>(
    frame: &Frame,
    opts: &FrameOptions,
    kt: &K,
) -> usize {
    opts.tun_mtu + calculate_payload_overhead(frame, opts, kt, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::crypto::KeyType;

    fn frame_with(extra_frame: usize, extra_tun: usize) -> Frame {
        let mut frame = Frame::new();
        frame.add_to_extra_frame(extra_frame);
        frame.add_to_extra_tun(extra_tun);
        frame
    }

    #[test]
    fn test_headroom_alignment() {
        for ef in 0..40 {
            for et in 0..8 {
                let frame = frame_with(ef, et);
                let headroom = frame.headroom();
                assert_eq!(headroom % PAYLOAD_ALIGN, 0);
                assert!(headroom >= ef + et);
                assert!(headroom < ef + et + PAYLOAD_ALIGN);
            }
        }
    }

    #[test]
    fn test_finalize_from_tun_mtu() {
        let mut frame = frame_with(41, 32);
        frame.finalize(MtuSpec::Tun(1500));
        assert_eq!(frame.link_mtu, 1573);
        assert_eq!(frame.link_mtu_dynamic, 1573);
        assert_eq!(frame.tun_mtu_size(), 1500);
        assert!(frame.is_defined());
    }

    #[test]
    fn test_finalize_from_link_mtu() {
        let mut frame = frame_with(41, 0);
        frame.finalize(MtuSpec::Link(1400));
        assert_eq!(frame.link_mtu, 1400);
        assert_eq!(frame.tun_mtu_size(), 1359);
        assert_eq!(frame.payload_size(), 1359);
    }

    #[test]
    fn test_subtract_extra_preserves_delta() {
        let mut frame = frame_with(60, 0);
        let mut fragment = Frame::new();
        fragment.add_to_extra_frame(4);

        let delta = frame.tun_link_delta();
        frame.subtract_extra(&fragment);
        assert_eq!(frame.extra_frame, 56);
        assert_eq!(frame.extra_tun, 4);
        assert_eq!(frame.tun_link_delta(), delta);
    }

    #[test]
    fn test_mtu_dynamic_upper_bound_only_decreases() {
        let mut frame = frame_with(40, 0);
        frame.finalize(MtuSpec::Link(1500));

        frame.set_mtu_dynamic(1400, MtuFlags::UPPER_BOUND);
        assert_eq!(frame.link_mtu_dynamic, 1400);
        frame.set_mtu_dynamic(1450, MtuFlags::UPPER_BOUND);
        assert_eq!(frame.link_mtu_dynamic, 1400);

        // without the flag the value may grow again, capped at link_mtu
        frame.set_mtu_dynamic(9000, MtuFlags::NONE);
        assert_eq!(frame.link_mtu_dynamic, 1500);
    }

    #[test]
    fn test_mtu_dynamic_tun_translation_and_floor() {
        let mut frame = frame_with(40, 10);
        frame.finalize(MtuSpec::Link(1500));

        frame.set_mtu_dynamic(1000, MtuFlags::TUN);
        assert_eq!(frame.link_mtu_dynamic, 1050);

        frame.set_mtu_dynamic(10, MtuFlags::NONE);
        assert_eq!(frame.link_mtu_dynamic, frame.expanded_size_min());
        assert_eq!(frame.payload_size_dynamic(), frame.expanded_size_min() - 40);
    }

    #[test]
    fn test_buf_size_doubles_headroom() {
        let mut frame = frame_with(40, 0);
        frame.add_to_extra_buffer(100);
        frame.add_to_extra_link(3);
        frame.finalize(MtuSpec::Tun(1500));
        assert_eq!(frame.headroom_base(), 143);
        assert_eq!(frame.buf_size(), 1500 + 286);
        assert_eq!(frame.max_rw_size_link(), 1543);
    }

    #[test]
    fn test_display() {
        let mut frame = frame_with(8, 0);
        frame.finalize(MtuSpec::Link(1200));
        assert_eq!(frame.to_string(), "[ L:1200 D:1200 EF:8 EB:0 ET:0 EL:0 ]");
    }

    #[test]
    fn test_protocol_header_aead_udp_peer_id() {
        let kt = KeyType::from_names("AES-256-GCM", "none").unwrap_or(KeyType::none());
        let opts = FrameOptions::default();
        // peer-id 4 + packet id 4 + tag 16
        assert_eq!(calculate_protocol_header_size(&kt, &opts, false), 24);
    }

    #[test]
    fn test_protocol_header_cbc_tcp() {
        let kt = KeyType::from_names("AES-256-CBC", "SHA1").unwrap_or(KeyType::none());
        let opts = FrameOptions {
            proto: TransportProto::Tcp,
            use_peer_id: false,
            ..FrameOptions::default()
        };
        // tcp length 2 + opcode 1 + hmac 20 + iv 16; packet id lives in the payload
        assert_eq!(calculate_protocol_header_size(&kt, &opts, false), 39);

        let frame = Frame::new();
        assert_eq!(calculate_payload_overhead(&frame, &opts, &kt, false), 4);
    }

    #[test]
    fn test_protocol_header_socks_and_occ() {
        let kt = KeyType::from_names("AES-128-CFB", "SHA256").unwrap_or(KeyType::none());
        let opts = FrameOptions {
            socks_proxy: true,
            ..FrameOptions::default()
        };
        // socks 10 + peer-id 4 + long packet id 8 + hmac 32
        assert_eq!(calculate_protocol_header_size(&kt, &opts, false), 54);
        // the options-string variant adds the IV
        assert_eq!(calculate_protocol_header_size(&kt, &opts, true), 70);
    }

    #[test]
    fn test_payload_size_counts_tun_extra_and_framing() {
        let mut frame = Frame::new();
        frame.add_to_extra_tun(TAP_MTU_EXTRA_DEFAULT);
        let kt = KeyType::from_names("AES-256-CBC", "SHA256").unwrap_or(KeyType::none());
        let opts = FrameOptions {
            compression: true,
            fragment: true,
            ..FrameOptions::default()
        };
        // tun 1500 + tap extra 32 + comp 1 + fragment 4 + packet id 4
        assert_eq!(calculate_payload_size(&frame, &opts, &kt), 1541);
        assert_eq!(calculate_payload_overhead(&frame, &opts, &kt, false), 9);
    }

    #[test]
    fn test_no_replay_no_packet_id() {
        let kt = KeyType::hmac_only(20);
        let opts = FrameOptions {
            replay: false,
            tls_mode: false,
            ..FrameOptions::default()
        };
        assert_eq!(calculate_protocol_header_size(&kt, &opts, false), 20);
    }
}
