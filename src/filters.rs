use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::Value;

/// A node-side audio filter.
///
/// Filters are kept per player and sent as one combined document, keyed by
/// [`Filter::key`]. Plugin filters are nested under `pluginFilters`.
pub trait Filter: Send + Sync {
    /// Field name of the filter in the node's filter document.
    fn key(&self) -> &str;

    fn is_plugin(&self) -> bool {
        false
    }

    fn to_value(&self) -> Value;
}

macro_rules! impl_filter {
    ($($ty:ty => $key:expr),* $(,)?) => {
        $(
            impl Filter for $ty {
                fn key(&self) -> &str {
                    $key
                }

                fn to_value(&self) -> Value {
                    serde_json::to_value(self).unwrap_or(Value::Null)
                }
            }
        )*
    };
}

/// Number of equalizer bands a node accepts.
pub const EQ_BAND_COUNT: u8 = 15;

/// Overall filter volume. 1.0 is unchanged, above 1.0 may clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Volume(pub f32);

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EqBand {
    /// Band index (0-14).
    pub band: u8,
    /// Gain multiplier (-0.25 to 1.0). 0.0 = no change.
    pub gain: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Equalizer {
    bands: Vec<EqBand>,
}

impl Equalizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets one band, replacing any previous gain for it. Out of range
    /// bands are ignored and gains are clamped.
    pub fn with_band(mut self, band: u8, gain: f32) -> Self {
        if band >= EQ_BAND_COUNT {
            return self;
        }
        let gain = gain.clamp(-0.25, 1.0);
        match self.bands.iter_mut().find(|b| b.band == band) {
            Some(existing) => existing.gain = gain,
            None => self.bands.push(EqBand { band, gain }),
        }
        self
    }

    pub fn bands(&self) -> &[EqBand] {
        &self.bands
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Timescale {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pitch: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LowPass {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoothing: Option<f32>,
}

impl_filter! {
    Volume => "volume",
    Equalizer => "equalizer",
    Timescale => "timescale",
    LowPass => "lowPass",
}

/// A filter given as raw JSON, for filters this crate does not model.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFilter {
    pub key: String,
    pub value: Value,
    pub plugin: bool,
}

impl RawFilter {
    pub fn new(key: impl Into<String>, value: Value) -> Self {
        Self {
            key: key.into(),
            value,
            plugin: false,
        }
    }

    pub fn plugin(key: impl Into<String>, value: Value) -> Self {
        Self {
            plugin: true,
            ..Self::new(key, value)
        }
    }
}

impl Filter for RawFilter {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_plugin(&self) -> bool {
        self.plugin
    }

    fn to_value(&self) -> Value {
        self.value.clone()
    }
}

/// The filters applied to one player.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: BTreeMap<String, Value>,
    plugin_filters: BTreeMap<String, Value>,
}

impl FilterSet {
    /// Adds or replaces a filter.
    pub fn set(&mut self, filter: &dyn Filter) {
        let key = filter.key().to_string();
        if filter.is_plugin() {
            self.plugin_filters.insert(key, filter.to_value());
        } else {
            self.filters.insert(key, filter.to_value());
        }
    }

    pub fn remove(&mut self, key: &str) -> bool {
        self.filters.remove(key).is_some() | self.plugin_filters.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.filters.clear();
        self.plugin_filters.clear();
    }

    pub fn contains(&self, key: &str) -> bool {
        self.filters.contains_key(key) || self.plugin_filters.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty() && self.plugin_filters.is_empty()
    }

    /// The full filter document. An empty set serializes to `{}`, which
    /// resets every filter on the node.
    pub fn payload(&self) -> Value {
        let mut doc: serde_json::Map<String, Value> = self
            .filters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.plugin_filters.is_empty() {
            let plugins: serde_json::Map<String, Value> = self
                .plugin_filters
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            doc.insert("pluginFilters".into(), Value::Object(plugins));
        }
        Value::Object(doc)
    }
}
