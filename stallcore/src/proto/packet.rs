//! Outgoing packet codec: an ordered list of typed fields serialized behind
//! the fixed 8-byte header `[u16 size][u32 0x80000000][u16 id]`.

use crate::buf::ScratchBuffer;
use crate::crypt::des3;
use crate::support::RelayResult;

use super::{
    CMD_DISCONNECT, CMD_GM_NOTICE, CMD_LOGIN, CMD_PERSONAL_MESSAGE_REPLY, CMD_PING_REPLY,
    CMD_SYSTEM_NOTICE, HEADER_LEN, SESSION_SERVER,
};

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    U8(u8),
    U16(u16),
    U32(u32),
    Str(String),
    Bytes(Vec<u8>),
}

impl Field {
    fn wire_size(&self) -> usize {
        match self {
            Field::U8(_) => 1,
            Field::U16(_) => 2,
            Field::U32(_) => 4,
            // u16 length prefix + bytes + terminator
            Field::Str(value) => 2 + value.len() + 1,
            // u16 length prefix + raw bytes
            Field::Bytes(value) => 2 + value.len(),
        }
    }

    fn write(&self, buf: &mut ScratchBuffer) -> RelayResult<()> {
        match self {
            Field::U8(value) => buf.write_u8(*value),
            Field::U16(value) => buf.write_u16(*value),
            Field::U32(value) => buf.write_u32(*value),
            Field::Str(value) => buf.write_string(value),
            Field::Bytes(value) => buf.write_bytes(value),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    id: u16,
    fields: Vec<Field>,
}

impl Payload {
    pub fn new(id: u16) -> Payload {
        Payload {
            id,
            fields: Vec::with_capacity(8),
        }
    }

    #[inline]
    pub fn id(&self) -> u16 {
        self.id
    }

    #[inline]
    pub fn push(&mut self, field: Field) -> &mut Self {
        self.fields.push(field);
        self
    }

    /// Total wire size, header included.
    pub fn size(&self) -> usize {
        HEADER_LEN + self.fields.iter().map(Field::wire_size).sum::<usize>()
    }

    /// Serialize into the scratch buffer and return the number of bytes
    /// written.
    pub fn write(&self, buf: &mut ScratchBuffer) -> RelayResult<usize> {
        let size = self.size();

        buf.write_u16(size as u16)?;
        buf.write_u32(SESSION_SERVER)?;
        buf.write_u16(self.id)?;

        for field in &self.fields {
            field.write(buf)?;
        }

        Ok(size)
    }
}

/// The login request replayed to the gate on behalf of a client, cached in
/// the session so a reconnecting account can re-issue it.
#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub nobill: String,
    pub account: String,
    pub password_des: Vec<u8>,
    pub mac_address: String,
    pub flag: u16,
    pub version: u16,
}

impl LoginRequest {
    /// The password field carries the chap string padded and encrypted with
    /// the md5 password hash as the 3DES key.
    pub fn encrypt_password(&mut self, chapstring: &str, password_md5: &str) -> RelayResult<()> {
        let padded = des3::pad_iso1(chapstring.as_bytes());
        self.password_des = des3::encrypt(&padded, password_md5.as_bytes())?;
        Ok(())
    }

    pub fn to_payload(&self) -> Payload {
        let mut payload = Payload::new(CMD_LOGIN);
        payload
            .push(Field::Str(self.nobill.clone()))
            .push(Field::Str(self.account.clone()))
            .push(Field::Bytes(self.password_des.clone()))
            .push(Field::Str(self.mac_address.clone()))
            .push(Field::U16(self.flag))
            .push(Field::U16(self.version));
        payload
    }
}

pub fn system_notice(message: &str) -> Payload {
    let mut payload = Payload::new(CMD_SYSTEM_NOTICE);
    payload.push(Field::Str(message.to_owned()));
    payload
}

pub fn gm_notice(message: &str) -> Payload {
    let mut payload = Payload::new(CMD_GM_NOTICE);
    payload
        .push(Field::Str("Stall Server".to_owned()))
        .push(Field::Str(message.to_owned()));
    payload
}

pub fn personal_message(from: &str, to: &str, message: &str) -> Payload {
    let mut payload = Payload::new(CMD_PERSONAL_MESSAGE_REPLY);
    payload
        .push(Field::Str(to.to_owned()))
        .push(Field::Str(from.to_owned()))
        .push(Field::Str(message.to_owned()));
    payload
}

pub fn disconnect_notice() -> Payload {
    Payload::new(CMD_DISCONNECT)
}

pub fn ping_reply() -> Payload {
    Payload::new(CMD_PING_REPLY)
}
