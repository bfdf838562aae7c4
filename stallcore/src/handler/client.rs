//! Hooks for client-originated commands.

use std::mem;

use slog::info;

use crate::bridge::{Bridge, Side};
use crate::buf::{Anchor, ScratchBuffer};
use crate::pool::lock_bridge;
use crate::proto::{self, packet, LoginRequest};
use crate::server::ServerCtx;
use crate::support::{check_mac_address, check_md5_hash, RelayResult};

use super::{Direction, PacketHandler};

/// Grid slots on a stall.
const MAX_STALL_GRIDS: u8 = 18;

/// The login never reaches the gate as sent: the relay caches it, encrypts
/// the password with the chap string and replays its own copy. When the
/// account is currently offline-stalling with the same password, the replay
/// is deferred until the stall's gate connection has been torn down.
#[derive(Default)]
pub struct LoginHandler {
    nobill: String,
    login: String,
    password_md5: String,
    mac_address: String,
    flag: u16,
    version: u16,
}

impl PacketHandler for LoginHandler {
    fn id(&self) -> u16 {
        proto::CMD_LOGIN
    }

    fn name(&self) -> &'static str {
        "login"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.nobill = buf.read_string()?;
        self.login = buf.read_string()?;
        self.password_md5 = buf.read_string()?;
        self.mac_address = buf.read_string()?;
        self.flag = buf.read_u16()?;
        self.version = buf.read_u16()?;
        Ok(())
    }

    fn validate(&self) -> bool {
        check_mac_address(&self.mac_address)
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        let mut deferred = false;

        if let Some(slot) = ctx.offline.find_by_account(&ctx.pool, &self.login) {
            if slot != bridge.slot() {
                let other = ctx.pool.get(slot).clone();
                // Holds this bridge's lock while taking the stall's. The
                // reverse path (replay on gate drop) never blocks, so the
                // pair cannot cycle.
                let mut other = lock_bridge(&other);

                if other.session.password_md5 == self.password_md5 {
                    other.session.reconnecting = true;
                    deferred = true;

                    info!(bridge.log(), "reclaiming offline stall";
                        "account" => &self.login, "stall_slot" => slot);

                    // The stall's gate link is asked to drop; our login is
                    // replayed from its teardown path.
                    let _ = other.send_packet(Side::Gate, &packet::disconnect_notice(), ctx);
                }
            }
        }

        let mut request = LoginRequest {
            nobill: mem::take(&mut self.nobill),
            account: self.login.clone(),
            password_des: Vec::new(),
            mac_address: mem::take(&mut self.mac_address),
            flag: self.flag,
            version: self.version,
        };
        request.encrypt_password(&bridge.session.chapstring, &self.password_md5)?;

        bridge.session.account = self.login.clone();
        bridge.session.password_md5 = mem::take(&mut self.password_md5);
        bridge.session.version = self.version;

        let payload = request.to_payload();
        bridge.session.login_request = Some(request);

        if !deferred {
            bridge.send_packet(Side::Gate, &payload, ctx)?;
        }

        Ok(false)
    }
}

/// Counts the items placed on the stall grid when it opens.
#[derive(Default)]
pub struct StallStartHandler {
    item_count: u32,
}

impl PacketHandler for StallStartHandler {
    fn id(&self) -> u16 {
        proto::CMD_STALL_START
    }

    fn name(&self) -> &'static str {
        "stall start"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        // Stall name, not needed.
        let name_len = buf.read_u16()? as isize;
        buf.seek_read(name_len, Anchor::Current)?;

        let grids = buf.read_u8()?.min(MAX_STALL_GRIDS);

        let mut total = 0u32;
        for _ in 0..grids {
            buf.seek_read(5, Anchor::Current)?;
            total += u32::from(buf.read_u8()?);
            buf.seek_read(1, Anchor::Current)?;
        }

        self.item_count = total;
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        bridge.session.item_count = self.item_count;
        Ok(true)
    }
}

/// The client took its stall down; offline eligibility is revoked with it.
#[derive(Default)]
pub struct StallCloseHandler;

impl PacketHandler for StallCloseHandler {
    fn id(&self) -> u16 {
        proto::CMD_STALL_CLOSE
    }

    fn name(&self) -> &'static str {
        "stall close"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, _buf: &mut ScratchBuffer) -> RelayResult<()> {
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        bridge.session.stall_open = false;
        bridge.session.offline_stall = false;
        Ok(true)
    }
}

/// A polite disconnect while the stall is open must not reach the gate, or
/// the character would leave the world instead of staying behind to trade.
#[derive(Default)]
pub struct DisconnectHandler;

impl PacketHandler for DisconnectHandler {
    fn id(&self) -> u16 {
        proto::CMD_DISCONNECT
    }

    fn name(&self) -> &'static str {
        "disconnect"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, _buf: &mut ScratchBuffer) -> RelayResult<()> {
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        Ok(!bridge.session.stall_open)
    }
}

#[derive(Default)]
pub struct CreatePinHandler {
    pin: String,
}

impl PacketHandler for CreatePinHandler {
    fn id(&self) -> u16 {
        proto::CMD_CREATE_PIN
    }

    fn name(&self) -> &'static str {
        "create pin"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.pin = buf.read_string()?;
        Ok(())
    }

    fn validate(&self) -> bool {
        check_md5_hash(&self.pin)
    }

    fn handle(&mut self, _bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        Ok(true)
    }
}

#[derive(Default)]
pub struct UpdatePinHandler {
    old_pin: String,
    new_pin: String,
}

impl PacketHandler for UpdatePinHandler {
    fn id(&self) -> u16 {
        proto::CMD_UPDATE_PIN
    }

    fn name(&self) -> &'static str {
        "update pin"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.old_pin = buf.read_string()?;
        self.new_pin = buf.read_string()?;
        Ok(())
    }

    fn validate(&self) -> bool {
        check_md5_hash(&self.old_pin) && check_md5_hash(&self.new_pin)
    }

    fn handle(&mut self, _bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        Ok(true)
    }
}

/// Whispers to a character that is offline-stalling are answered locally;
/// the gate still believes the character is online and would route them
/// into a void.
#[derive(Default)]
pub struct PersonalMessageHandler {
    character: String,
    message: String,
}

impl PacketHandler for PersonalMessageHandler {
    fn id(&self) -> u16 {
        proto::CMD_PERSONAL_MESSAGE
    }

    fn name(&self) -> &'static str {
        "personal message"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.character = buf.read_string()?;
        self.message = buf.read_string()?;
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        if ctx
            .offline
            .find_by_character(&ctx.pool, &self.character)
            .is_some()
        {
            let sender = bridge.session.character_name.clone();
            let reply =
                packet::personal_message(&sender, &self.character, "This player is offline now!");
            bridge.send_packet(Side::Game, &reply, ctx)?;
            return Ok(false);
        }

        Ok(true)
    }
}

macro_rules! invite_handler {
    ($name:ident, $id:expr, $label:expr) => {
        #[derive(Default)]
        pub struct $name {
            character: String,
        }

        impl PacketHandler for $name {
            fn id(&self) -> u16 {
                $id
            }

            fn name(&self) -> &'static str {
                $label
            }

            fn direction(&self) -> Direction {
                Direction::ClientToGate
            }

            fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
                self.character = buf.read_string()?;
                Ok(())
            }

            fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
                if ctx
                    .offline
                    .find_by_character(&ctx.pool, &self.character)
                    .is_some()
                {
                    bridge.system_notice("This player is offline now!", ctx)?;
                    return Ok(false);
                }

                Ok(true)
            }
        }
    };
}

invite_handler!(FriendInviteHandler, proto::CMD_FRIEND_INVITE, "friend invite");
invite_handler!(TeamInviteHandler, proto::CMD_TEAM_INVITE, "team invite");

/// One-on-one chat invitations get the same offline answer; group sessions
/// pass through untouched.
#[derive(Default)]
pub struct TalkSessionHandler {
    member_count: u8,
    character: String,
}

impl PacketHandler for TalkSessionHandler {
    fn id(&self) -> u16 {
        proto::CMD_TALK_SESSION
    }

    fn name(&self) -> &'static str {
        "talk session"
    }

    fn direction(&self) -> Direction {
        Direction::ClientToGate
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.member_count = buf.read_u8()?;
        self.character.clear();

        if self.member_count == 1 {
            self.character = buf.read_string()?;
        }

        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        if self.member_count == 1
            && ctx
                .offline
                .find_by_character(&ctx.pool, &self.character)
                .is_some()
        {
            bridge.system_notice("This player is offline now!", ctx)?;
            return Ok(false);
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The cursor sits right after the 8-byte header when a handler reads.
    fn frame_buf(body: &[u8]) -> ScratchBuffer {
        let mut buf = ScratchBuffer::new(4096);
        buf.write(&[0u8; 8]).unwrap();
        buf.write(body).unwrap();
        buf.seek_read(8, Anchor::Begin).unwrap();
        buf
    }

    #[test]
    fn stall_start_rejects_a_name_length_past_the_frame_end() {
        // 16-byte frame whose stall-name length field points far beyond it.
        let mut buf = ScratchBuffer::new(4096);
        buf.write(&[0u8; 8]).unwrap();
        buf.write_u16(4086).unwrap();
        buf.write(&[0u8; 6]).unwrap();
        buf.seek_read(8, Anchor::Begin).unwrap();

        let mut handler = StallStartHandler::default();
        assert!(handler.read(16, &mut buf).is_err());
    }

    #[test]
    fn stall_start_counts_items_across_grids() {
        let mut body = ScratchBuffer::new(256);
        body.write_string("wares").unwrap();
        body.write_u8(2).unwrap();
        for count in [3u8, 4] {
            body.write(&[0u8; 5]).unwrap();
            body.write_u8(count).unwrap();
            body.write(&[0u8; 1]).unwrap();
        }

        let mut buf = frame_buf(body.as_slice());
        let mut handler = StallStartHandler::default();
        handler.read(8 + body.written(), &mut buf).unwrap();
        assert_eq!(handler.item_count, 7);
    }

    #[test]
    fn login_validation_requires_a_well_formed_mac() {
        let mut handler = LoginHandler::default();
        handler.mac_address = "00-1A-2B-3C-4D-5E-6F-70".to_owned();
        assert!(handler.validate());

        handler.mac_address = "junk".to_owned();
        assert!(!handler.validate());
    }
}
