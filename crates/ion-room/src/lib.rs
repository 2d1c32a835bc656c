//! ion SFU room client
//!
//! A [`RoomSession`] joins one room as one participant, publishes local
//! tracks and follows the room's `stream-add` / `stream-remove`
//! notifications with one subscription per remote stream.

pub mod biz;
mod config;
mod error;
mod session;

pub use config::{RoomConfig, DEFAULT_SIGNAL_URL};
pub use error::{RoomError, RoomResult};
pub use session::{Consumer, RoomSession};

pub use ion_media as media;
pub use ion_protoo as protoo;
