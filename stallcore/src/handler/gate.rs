//! Hooks for gate-originated commands.

use std::mem;

use slog::{debug, info};

use crate::bridge::{Bridge, Side};
use crate::buf::{Anchor, ScratchBuffer};
use crate::crypt::{des3, noise, NoiseKey};
use crate::proto::{self, packet};
use crate::server::ServerCtx;
use crate::support::{lower_case, ErrorKind, RelayError, RelayResult};

use super::{Direction, PacketHandler};

/// First frame the gate sends; its chap string seeds both the password
/// encryption and the per-session noise keys.
#[derive(Default)]
pub struct ChapStringHandler {
    chapstring: String,
}

impl PacketHandler for ChapStringHandler {
    fn id(&self) -> u16 {
        proto::CMD_CHAPSTR
    }

    fn name(&self) -> &'static str {
        "chap string"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.chapstring = buf.read_string()?;
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        bridge.session.chapstring = mem::take(&mut self.chapstring);
        Ok(true)
    }
}

/// On a successful login the gate hands back the session key, 3DES-wrapped
/// with the password hash, and a flag telling whether the stream switches to
/// encrypted frames.
#[derive(Default)]
pub struct LoginResultHandler {
    ret: u16,
    enc_key: Vec<u8>,
    encrypted: bool,
}

impl PacketHandler for LoginResultHandler {
    fn id(&self) -> u16 {
        proto::CMD_LOGIN_RESULT
    }

    fn name(&self) -> &'static str {
        "login result"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.ret = buf.read_u16()?;
        self.enc_key.clear();
        self.encrypted = false;

        if self.ret == 0 {
            let key_len = buf.read_u16()? as usize;
            if key_len > buf.remaining() {
                return Err(RelayError::Fatal(ErrorKind::BadPacket));
            }

            self.enc_key.resize(key_len, 0);
            buf.read(&mut self.enc_key)?;

            // The encryption flag sits 8 bytes before the end of the frame.
            buf.seek_read(frame_len as isize - 8, Anchor::Begin)?;
            self.encrypted = buf.read_u32()? != 0;
        }

        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        let authed = self.ret == 0;
        bridge.session.authed = authed;

        if authed {
            bridge.session.encrypted = self.encrypted;

            if self.encrypted {
                bridge.session.session_key =
                    des3::derive_session_key(&self.enc_key, &bridge.session.password_md5)?;
                bridge.session.session_key_len = des3::SESSION_KEY_LEN;

                let seed = noise::seed(
                    bridge.session.version,
                    bridge.session.chapstring.as_bytes(),
                )
                .ok_or(RelayError::Fatal(ErrorKind::BadPacket))?;

                bridge.seed_noise_keys(NoiseKey::new(seed));
            }

            info!(bridge.log(), "authorized";
                "account" => &bridge.session.account,
                "encrypted" => self.encrypted);
        } else {
            debug!(bridge.log(), "login rejected"; "code" => self.ret);
        }

        Ok(true)
    }
}

/// Tracks the character and map so offline lookups and the stall map filter
/// have something to match against.
#[derive(Default)]
pub struct EnterMapHandler {
    map: String,
    character_id: u32,
    character_name: String,
}

impl PacketHandler for EnterMapHandler {
    fn id(&self) -> u16 {
        proto::CMD_ENTER_MAP
    }

    fn name(&self) -> &'static str {
        "enter map"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        buf.seek_read(6, Anchor::Current)?;
        self.map = buf.read_string()?;
        buf.seek_read(5, Anchor::Current)?;
        self.character_id = buf.read_u32()?;
        buf.seek_read(4, Anchor::Current)?;
        self.character_name = buf.read_string()?;
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, _ctx: &ServerCtx) -> RelayResult<bool> {
        bridge.session.map = mem::take(&mut self.map);
        bridge.session.character_id = self.character_id;
        bridge.session.character_name = mem::take(&mut self.character_name);
        Ok(true)
    }
}

/// The gate confirmed the stall. The relay decides here whether it will
/// keep the character trading after the client leaves, and tells the player
/// either way.
#[derive(Default)]
pub struct StallSuccessHandler;

impl PacketHandler for StallSuccessHandler {
    fn id(&self) -> u16 {
        proto::CMD_STALL_SUCCESS
    }

    fn name(&self) -> &'static str {
        "stall success"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, _frame_len: usize, _buf: &mut ScratchBuffer) -> RelayResult<()> {
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        bridge.session.stall_open = true;

        let map = lower_case(&bridge.session.map);
        let listed = ctx
            .settings
            .maps
            .iter()
            .any(|candidate| lower_case(candidate) == map);

        if !listed {
            bridge.session.offline_stall = false;
            bridge.system_notice(
                "Offline stall not installed: The offline stall system is disabled on this map.",
                ctx,
            )?;
            return Ok(true);
        }

        if ctx.settings.max_stalls_per_ip != 0 {
            let ip = bridge.game_ip();
            let mut stalls = 0usize;
            ctx.offline.for_each(&ctx.pool, |other| {
                if other.game_ip() == ip {
                    stalls += 1;
                }
            });

            if stalls >= ctx.settings.max_stalls_per_ip {
                bridge.session.offline_stall = false;
                bridge.system_notice(
                    "Offline stall not installed: The maximum number of offline stalls is set from your IP address.",
                    ctx,
                )?;
                return Ok(true);
            }
        }

        bridge.session.offline_stall = true;
        info!(bridge.log(), "offline stall armed";
            "character" => &bridge.session.character_name,
            "map" => &bridge.session.map,
            "items" => bridge.session.item_count);
        bridge.system_notice(
            "Offline stall has been installed: Your character will remain trading after disconnecting from the server.",
            ctx,
        )?;

        Ok(true)
    }
}

/// Item sold off the stall. An offline stall that empties out is torn down
/// when the settings say so.
#[derive(Default)]
pub struct StallDelHandler {
    character_id: u32,
    sold: u8,
}

impl PacketHandler for StallDelHandler {
    fn id(&self) -> u16 {
        proto::CMD_STALL_DEL
    }

    fn name(&self) -> &'static str {
        "stall del"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, _frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()> {
        self.character_id = buf.read_u32()?;
        // Grid id, not needed.
        buf.seek_read(1, Anchor::Current)?;
        self.sold = buf.read_u8()?;
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        if bridge.session.character_id == self.character_id && bridge.session.stall_open {
            bridge.session.item_count = bridge.session.item_count.saturating_sub(u32::from(self.sold));

            if bridge.session.item_count == 0 && ctx.settings.close_stall_on_empty {
                if !bridge.game_connected() {
                    info!(bridge.log(), "offline stall sold out";
                        "character" => &bridge.session.character_name);
                    bridge.disconnect(ctx);
                } else {
                    bridge.session.stall_open = false;
                }
            }
        }

        Ok(true)
    }
}

/// Keepalives addressed to a departed client are answered on its behalf so
/// the gate keeps the offline stall alive.
#[derive(Default)]
pub struct PingRequestHandler;

impl PacketHandler for PingRequestHandler {
    fn id(&self) -> u16 {
        proto::CMD_PING_REQUEST
    }

    fn name(&self) -> &'static str {
        "ping request"
    }

    fn direction(&self) -> Direction {
        Direction::GateToClient
    }

    fn read(&mut self, _frame_len: usize, _buf: &mut ScratchBuffer) -> RelayResult<()> {
        Ok(())
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool> {
        if !bridge.game_connected() && bridge.session.stall_open {
            bridge.send_packet(Side::Gate, &packet::ping_reply(), ctx)?;
            return Ok(false);
        }

        Ok(true)
    }
}
