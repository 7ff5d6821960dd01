//! Packet opcodes and the header byte.
//!
//! ```text
//!   7   6   5   4   3   2   1   0
//! +---+---+---+---+---+---+---+---+
//! |      opcode       |  key_id   |
//! +---+---+---+---+---+---+---+---+
//! ```

use crate::error::{ProtocolError, Result};
use std::fmt;

pub const P_KEY_ID_MASK: u8 = 0x07;
pub const P_OPCODE_SHIFT: u8 = 3;

pub const P_FIRST_OPCODE: u8 = 3;
pub const P_LAST_OPCODE: u8 = 10;

/// Number of key slots addressable by the key id field
pub const KEY_ID_COUNT: u8 = 8;

/// Packet type carried in the upper five bits of the header byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// New key, graceful transition from old to new key
    SoftResetV1 = 3,
    /// Control channel packet (usually TLS ciphertext)
    ControlV1 = 4,
    /// Acknowledgement for packets received
    AckV1 = 5,
    DataV1 = 6,
    /// Initial key from client, forget previous state
    HardResetClientV2 = 7,
    /// Initial key from server, forget previous state
    HardResetServerV2 = 8,
    /// Data channel packet with peer id
    DataV2 = 9,
    /// Initial key from a client holding a client-specific wrapping key
    HardResetClientV3 = 10,
}

impl Opcode {
    /// Start a new session
    pub fn is_hard_reset(self) -> bool {
        matches!(
            self,
            Opcode::HardResetClientV2 | Opcode::HardResetServerV2 | Opcode::HardResetClientV3
        )
    }

    /// Reset a peer may send to open a session with us
    pub fn is_client_reset(self) -> bool {
        matches!(self, Opcode::HardResetClientV2 | Opcode::HardResetClientV3)
    }

    /// Control channel traffic of an established session
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::SoftResetV1 | Opcode::ControlV1 | Opcode::AckV1)
    }

    pub fn is_data(self) -> bool {
        matches!(self, Opcode::DataV1 | Opcode::DataV2)
    }

    pub fn name(self) -> &'static str {
        opcode_name(self as u8)
    }
}

impl TryFrom<u8> for Opcode {
    type Error = ProtocolError;

    fn try_from(op: u8) -> Result<Self> {
        match op {
            3 => Ok(Opcode::SoftResetV1),
            4 => Ok(Opcode::ControlV1),
            5 => Ok(Opcode::AckV1),
            6 => Ok(Opcode::DataV1),
            7 => Ok(Opcode::HardResetClientV2),
            8 => Ok(Opcode::HardResetServerV2),
            9 => Ok(Opcode::DataV2),
            10 => Ok(Opcode::HardResetClientV3),
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Canonical name of a raw opcode value, `"P_???"` when unknown
pub fn opcode_name(op: u8) -> &'static str {
    match op {
        1 => "P_CONTROL_HARD_RESET_CLIENT_V1",
        2 => "P_CONTROL_HARD_RESET_SERVER_V1",
        3 => "P_CONTROL_SOFT_RESET_V1",
        4 => "P_CONTROL_V1",
        5 => "P_ACK_V1",
        6 => "P_DATA_V1",
        7 => "P_CONTROL_HARD_RESET_CLIENT_V2",
        8 => "P_CONTROL_HARD_RESET_SERVER_V2",
        9 => "P_DATA_V2",
        10 => "P_CONTROL_HARD_RESET_CLIENT_V3",
        _ => "P_???",
    }
}

/// Pack opcode and key id into one header byte
pub fn header_byte(opcode: Opcode, key_id: u8) -> u8 {
    ((opcode as u8) << P_OPCODE_SHIFT) | (key_id & P_KEY_ID_MASK)
}

/// Split a header byte into its raw opcode and key id
pub fn split_header(byte: u8) -> (u8, u8) {
    (byte >> P_OPCODE_SHIFT, byte & P_KEY_ID_MASK)
}
