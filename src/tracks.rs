use std::sync::Arc;

use async_trait::async_trait;

use crate::{client::Client, common::LoadError};

pub use crate::protocol::AudioTrack;

/// Resolves the playable payload of a [`DeferredTrack`] at play time.
#[async_trait]
pub trait TrackLoader: Send + Sync {
    /// Returns the encoded track, or `None` when nothing playable was found.
    async fn load(&self, client: &Client, track: &AudioTrack) -> Result<Option<String>, LoadError>;
}

/// A track known only by its metadata until it is played, e.g. a search
/// result from a catalogue the node cannot stream directly.
#[derive(Clone)]
pub struct DeferredTrack {
    track: AudioTrack,
    loader: Arc<dyn TrackLoader>,
}

impl std::fmt::Debug for DeferredTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredTrack")
            .field("track", &self.track)
            .finish_non_exhaustive()
    }
}

impl DeferredTrack {
    pub fn new(track: AudioTrack, loader: Arc<dyn TrackLoader>) -> Self {
        Self { track, loader }
    }

    pub fn track(&self) -> &AudioTrack {
        &self.track
    }

    pub async fn load(&self, client: &Client) -> Result<Option<String>, LoadError> {
        if let Some(encoded) = &self.track.encoded {
            return Ok(Some(encoded.clone()));
        }
        self.loader.load(client, &self.track).await
    }
}

/// Anything a player can be asked to play.
#[derive(Debug, Clone)]
pub enum PlayableTrack {
    Resolved(AudioTrack),
    Deferred(DeferredTrack),
}

impl PlayableTrack {
    pub fn track(&self) -> &AudioTrack {
        match self {
            Self::Resolved(track) => track,
            Self::Deferred(deferred) => deferred.track(),
        }
    }

    pub fn into_track(self) -> AudioTrack {
        match self {
            Self::Resolved(track) => track,
            Self::Deferred(deferred) => deferred.track,
        }
    }
}

impl From<AudioTrack> for PlayableTrack {
    fn from(track: AudioTrack) -> Self {
        Self::Resolved(track)
    }
}

impl From<DeferredTrack> for PlayableTrack {
    fn from(track: DeferredTrack) -> Self {
        Self::Deferred(track)
    }
}
