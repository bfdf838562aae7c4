use crate::crypt::des3::SESSION_KEY_LEN;
use crate::proto::LoginRequest;

/// Per-player state attached to a bridge, mutated only by handlers running
/// under that bridge's lock.
#[derive(Default)]
pub struct PlayerSession {
    pub authed: bool,
    pub version: u16,
    /// Packet encryption negotiated by the login result.
    pub encrypted: bool,
    pub session_key: [u8; SESSION_KEY_LEN],
    pub session_key_len: usize,
    pub chapstring: String,
    pub account: String,
    pub password_md5: String,
    pub map: String,
    pub character_id: u32,
    pub character_name: String,
    /// The client's stall is currently open.
    pub stall_open: bool,
    /// The open stall qualifies for offline trading.
    pub offline_stall: bool,
    /// Items left on the stall grid.
    pub item_count: u32,
    /// A new connection for this account is waiting for our gate side to
    /// drop before replaying its login.
    pub reconnecting: bool,
    /// Login cached for the reconnection hand-off.
    pub login_request: Option<LoginRequest>,
}

impl PlayerSession {
    #[inline]
    pub fn session_key(&self) -> &[u8] {
        &self.session_key[..self.session_key_len]
    }

    pub fn reset(&mut self) {
        *self = PlayerSession::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_zeroes_key_material() {
        let mut session = PlayerSession::default();
        session.authed = true;
        session.session_key = [1, 2, 3, 4, 5, 6];
        session.session_key_len = SESSION_KEY_LEN;
        session.account = "trader".to_owned();
        session.login_request = Some(LoginRequest::default());

        session.reset();

        assert!(!session.authed);
        assert_eq!(session.session_key, [0u8; SESSION_KEY_LEN]);
        assert!(session.session_key().is_empty());
        assert!(session.account.is_empty());
        assert!(session.login_request.is_none());
    }
}
