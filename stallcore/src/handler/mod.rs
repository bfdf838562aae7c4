//! Packet inspection layer. Most frames pass straight through the relay;
//! handlers hook the handful of commands whose content drives session state,
//! and decide per frame whether the original bytes are still forwarded.

pub mod client;
pub mod gate;

use hashbrown::HashMap;

use crate::bridge::Bridge;
use crate::buf::ScratchBuffer;
use crate::server::ServerCtx;
use crate::support::{ErrorKind, RelayError, RelayResult};

/// Which way a hooked command travels.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Direction {
    ClientToGate,
    GateToClient,
}

/// A hook for one command id. `read` decodes the frame body (the cursor
/// starts right after the 8-byte header), `validate` rejects frames whose
/// fields are malformed, and `handle` applies the effect. Returning `false`
/// from `handle` swallows the frame instead of forwarding it.
pub trait PacketHandler: Send {
    fn id(&self) -> u16;
    fn name(&self) -> &'static str;
    fn direction(&self) -> Direction;

    fn read(&mut self, frame_len: usize, buf: &mut ScratchBuffer) -> RelayResult<()>;

    fn validate(&self) -> bool {
        true
    }

    fn handle(&mut self, bridge: &mut Bridge, ctx: &ServerCtx) -> RelayResult<bool>;
}

/// Command id to handler map owned by a worker thread.
pub struct HandlerRegistry {
    handlers: HashMap<u16, Box<dyn PacketHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> HandlerRegistry {
        HandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    /// The full command set hooked by the relay.
    pub fn standard() -> RelayResult<HandlerRegistry> {
        let mut registry = HandlerRegistry::new();

        registry.register(Box::new(client::LoginHandler::default()))?;
        registry.register(Box::new(client::StallStartHandler::default()))?;
        registry.register(Box::new(client::StallCloseHandler::default()))?;
        registry.register(Box::new(client::DisconnectHandler::default()))?;
        registry.register(Box::new(client::CreatePinHandler::default()))?;
        registry.register(Box::new(client::UpdatePinHandler::default()))?;
        registry.register(Box::new(client::PersonalMessageHandler::default()))?;
        registry.register(Box::new(client::FriendInviteHandler::default()))?;
        registry.register(Box::new(client::TeamInviteHandler::default()))?;
        registry.register(Box::new(client::TalkSessionHandler::default()))?;

        registry.register(Box::new(gate::ChapStringHandler::default()))?;
        registry.register(Box::new(gate::LoginResultHandler::default()))?;
        registry.register(Box::new(gate::EnterMapHandler::default()))?;
        registry.register(Box::new(gate::StallSuccessHandler::default()))?;
        registry.register(Box::new(gate::StallDelHandler::default()))?;
        registry.register(Box::new(gate::PingRequestHandler::default()))?;

        Ok(registry)
    }

    pub fn register(&mut self, handler: Box<dyn PacketHandler>) -> RelayResult<()> {
        let id = handler.id();

        if self.handlers.contains_key(&id) {
            return Err(RelayError::Fatal(ErrorKind::DuplicateHandler));
        }

        self.handlers.insert(id, handler);
        Ok(())
    }

    #[inline]
    pub fn get_mut(&mut self, id: u16, direction: Direction) -> Option<&mut dyn PacketHandler> {
        match self.handlers.get_mut(&id) {
            Some(handler) if handler.direction() == direction => Some(handler.as_mut()),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto;

    #[test]
    fn standard_set_is_complete() {
        let mut registry = HandlerRegistry::standard().unwrap();
        assert_eq!(registry.len(), 16);

        assert!(registry
            .get_mut(proto::CMD_LOGIN, Direction::ClientToGate)
            .is_some());
        assert!(registry
            .get_mut(proto::CMD_LOGIN_RESULT, Direction::GateToClient)
            .is_some());
        assert!(registry.get_mut(9999, Direction::ClientToGate).is_none());
    }

    #[test]
    fn direction_must_match() {
        let mut registry = HandlerRegistry::standard().unwrap();

        assert!(registry
            .get_mut(proto::CMD_LOGIN, Direction::GateToClient)
            .is_none());
        assert!(registry
            .get_mut(proto::CMD_PING_REQUEST, Direction::ClientToGate)
            .is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut registry = HandlerRegistry::new();

        registry
            .register(Box::new(client::LoginHandler::default()))
            .unwrap();
        assert_eq!(
            registry.register(Box::new(client::LoginHandler::default())),
            Err(RelayError::Fatal(ErrorKind::DuplicateHandler))
        );
    }
}
