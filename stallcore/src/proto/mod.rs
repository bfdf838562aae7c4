//! Wire-level constants and frame validation for the legacy game protocol.
//!
//! Every frame is `[u16 length][u32 session][u16 command][body...]` with all
//! integers in network byte order; `length` counts the whole frame. A frame
//! of length 2 is a ping with no body.

pub mod packet;

pub use self::packet::{Field, LoginRequest, Payload};

/// Fixed frame header size.
pub const HEADER_LEN: usize = 8;

/// A ping frame is its length field and nothing else.
pub const PING_LEN: usize = 2;

/// Shortest valid non-ping frame.
pub const MIN_FRAME_LEN: usize = 6;

/// Session sentinel used by gate-originated traffic.
pub const SESSION_SERVER: u32 = 0x8000_0000;

/// Session sentinel used by client-originated traffic.
pub const SESSION_CLIENT: u32 = 0x0000_0001;

/// Width of each command-id range.
pub const CMD_INTERVAL: u16 = 500;

/// Range bases: client→gate, gate→client, gate→client (extended),
/// client→gate (extended). Bases themselves are not valid ids.
pub const CMD_BASES: [u16; 4] = [0, 500, 5000, 6000];

pub const CMD_LOGIN: u16 = 431;
pub const CMD_CHAPSTR: u16 = 940;
pub const CMD_LOGIN_RESULT: u16 = 931;
pub const CMD_ENTER_MAP: u16 = 516;
pub const CMD_STALL_START: u16 = 330;
pub const CMD_STALL_CLOSE: u16 = 333;
pub const CMD_STALL_SUCCESS: u16 = 858;
pub const CMD_STALL_DEL: u16 = 856;
pub const CMD_PING_REQUEST: u16 = 537;
pub const CMD_PING_REPLY: u16 = 17;
pub const CMD_DISCONNECT: u16 = 432;
pub const CMD_CREATE_PIN: u16 = 346;
pub const CMD_UPDATE_PIN: u16 = 347;
pub const CMD_TEAM_INVITE: u16 = 6001;
pub const CMD_FRIEND_INVITE: u16 = 6011;
pub const CMD_PERSONAL_MESSAGE: u16 = 6403;
pub const CMD_TALK_SESSION: u16 = 6406;
pub const CMD_SYSTEM_NOTICE: u16 = 517;
pub const CMD_GM_NOTICE: u16 = 5400;
pub const CMD_PERSONAL_MESSAGE_REPLY: u16 = 5403;

/// A frame length is valid when it is exactly the ping length or at least
/// the minimum data frame length.
#[inline]
pub fn is_valid_frame_len(len: usize) -> bool {
    len == PING_LEN || len >= MIN_FRAME_LEN
}

#[inline]
pub fn is_valid_session(session: u32) -> bool {
    session == SESSION_SERVER || session == SESSION_CLIENT
}

/// Command ids live in four disjoint 500-wide ranges, each exclusive of its
/// base.
pub fn is_valid_command(id: u16) -> bool {
    id != 0
        && CMD_BASES
            .iter()
            .any(|&base| id > base && id < base + CMD_INTERVAL)
}
