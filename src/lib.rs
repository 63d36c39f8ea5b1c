//! Client library for Pegasus audio nodes.
//!
//! A [`Client`] keeps a pool of remote nodes, one [`Player`] per room, and
//! keeps each player's playback and voice state in sync with the node that
//! hosts it, moving players to another node when theirs goes away.

pub mod client;
pub mod common;
pub mod configs;
pub mod events;
pub mod filters;
pub mod node;
pub mod player;
pub mod protocol;
pub mod sources;
pub mod tracks;

#[cfg(test)]
pub(crate) mod testing;

pub use client::Client;
pub use common::{Error, Outcome, Result};
pub use configs::Config;
pub use events::{Event, EventKind, Interest};
pub use node::{Node, NodeManager, SelectionHint};
pub use player::{PlayOptions, Player, PlayerManager, PlayerStatus};
pub use tracks::{DeferredTrack, PlayableTrack, TrackLoader};
