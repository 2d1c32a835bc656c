//! protoo signalling peer
//!
//! JSON request/response/notification messaging over a WebSocket, as spoken
//! by ion and mediasoup style SFUs.

pub mod message;
mod peer;

pub use message::{Message, Notification, Request, Response, ResponseError};
pub use peer::{
    CloseEvent, InboundRequest, Peer, PeerError, PeerEvents, PeerResult, Responder,
    DEFAULT_REQUEST_TIMEOUT, PROTOO_SUBPROTOCOL,
};
