use serde_json::{Map, Value};

use crate::{
    common::{Error, Result},
    configs::MAX_VOLUME,
};

/// Fields of a player update that extra fields must not shadow.
const RESERVED_FIELDS: &[&str] = &[
    "track",
    "encodedTrack",
    "identifier",
    "position",
    "endTime",
    "volume",
    "paused",
    "filters",
    "voice",
];

/// Options for [`Player::play_track`](crate::player::Player::play_track).
#[derive(Debug, Clone, Default)]
pub struct PlayOptions {
    /// Start position in milliseconds.
    pub start_time: Option<i64>,
    /// Position in milliseconds at which playback ends. Must be at least 1
    /// and, when `start_time` is set too, greater than it.
    pub end_time: Option<i64>,
    /// Keep the current track if one is playing.
    pub no_replace: bool,
    /// Clamped to 0..=1000.
    pub volume: Option<i32>,
    pub pause: Option<bool>,
    /// Overrides the track's own user data.
    pub user_data: Option<Value>,
    /// Plugin fields merged into the update document.
    pub extra: Map<String, Value>,
}

impl PlayOptions {
    pub fn start_time(mut self, ms: i64) -> Self {
        self.start_time = Some(ms);
        self
    }

    /// Sets the end position. [`Player::play_track`](crate::player::Player::play_track)
    /// rejects values below 1 or not after `start_time`.
    pub fn end_time(mut self, ms: i64) -> Self {
        self.end_time = Some(ms);
        self
    }

    pub fn no_replace(mut self, no_replace: bool) -> Self {
        self.no_replace = no_replace;
        self
    }

    pub fn volume(mut self, volume: i32) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn paused(mut self, pause: bool) -> Self {
        self.pause = Some(pause);
        self
    }

    pub fn user_data(mut self, user_data: Value) -> Self {
        self.user_data = Some(user_data);
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    pub(crate) fn validate(self) -> Result<ValidatedPlay> {
        let start_time = match self.start_time {
            Some(ms) if ms < 0 => {
                return Err(Error::Validation(format!(
                    "start_time must be >= 0, got {}",
                    ms
                )));
            }
            Some(ms) => Some(ms as u64),
            None => None,
        };

        let end_time = match self.end_time {
            Some(ms) if ms < 1 => {
                return Err(Error::Validation(format!(
                    "end_time must be >= 1, got {}",
                    ms
                )));
            }
            Some(ms) => Some(ms as u64),
            None => None,
        };

        if let (Some(start), Some(end)) = (start_time, end_time) {
            if end <= start {
                return Err(Error::Validation(format!(
                    "end_time ({}) must be after start_time ({})",
                    end, start
                )));
            }
        }

        if let Some(key) = self
            .extra
            .keys()
            .find(|k| RESERVED_FIELDS.contains(&k.as_str()))
        {
            return Err(Error::Validation(format!(
                "extra field {} shadows a player field",
                key
            )));
        }

        Ok(ValidatedPlay {
            start_time,
            end_time,
            no_replace: self.no_replace,
            volume: self.volume.map(|v| v.clamp(0, MAX_VOLUME) as u16),
            pause: self.pause,
            user_data: self.user_data,
            extra: self.extra,
        })
    }
}

#[derive(Debug)]
pub(crate) struct ValidatedPlay {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    pub no_replace: bool,
    pub volume: Option<u16>,
    pub pause: Option<bool>,
    pub user_data: Option<Value>,
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_negative_start() {
        let err = PlayOptions::default().start_time(-1).validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn rejects_end_before_one() {
        assert!(PlayOptions::default().end_time(0).validate().is_err());
        assert!(PlayOptions::default().end_time(1).validate().is_ok());
    }

    #[test]
    fn rejects_end_not_after_start() {
        let err = PlayOptions::default()
            .start_time(5_000)
            .end_time(5_000)
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("must be after"));
    }

    #[test]
    fn clamps_volume() {
        let play = PlayOptions::default().volume(5_000).validate().unwrap();
        assert_eq!(play.volume, Some(1000));
        let play = PlayOptions::default().volume(-3).validate().unwrap();
        assert_eq!(play.volume, Some(0));
    }

    #[test]
    fn extra_cannot_shadow_fields() {
        let err = PlayOptions::default()
            .extra("volume", serde_json::json!("loud"))
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let play = PlayOptions::default()
            .extra("lyrics", serde_json::json!(true))
            .validate()
            .unwrap();
        assert_eq!(play.extra.len(), 1);
    }
}
