//! # Core Packet Geometry
//!
//! Buffers, frame accounting and MSS clamping.
//!
//! This module owns every byte-budget computation of the control channel:
//! how much each layer adds, where payload starts inside a buffer, and how
//! large a wire packet may get.
//!
//! ## Components
//! - **Buffer**: byte buffer with headroom for back-to-front record building
//! - **Frame**: MTU and overhead accounting, header and payload size helpers
//! - **MSS**: TCP MSS clamping for tunnelled SYN segments
//!
//! ## Layout
//! ```text
//! [headroom (extra_frame + extra_tun, 4-aligned)] [payload (tun MTU)] [tail]
//! ```

pub mod buffer;
pub mod frame;
pub mod mss;

pub use buffer::Buffer;
pub use frame::{Frame, FrameOptions, MtuFlags, MtuSpec};
