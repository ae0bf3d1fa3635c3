// Copyright The AckBus Authors
// SPDX-License-Identifier: Apache-2.0

//! Channel naming and tiered configuration resolution.
//!
//! Configurable scalars flow through three tiers before a channel ever sees
//! them:
//!
//! 1. [`GlobalConfig`] -- process-wide defaults (also the only tier carrying
//!    `log_level`).
//! 2. [`BusConfig`] -- a duplicate of the globals with explicit bus-level
//!    overrides applied.
//! 3. [`ChannelSettings`] -- per-channel overrides resolved against the bus
//!    config into plain scalars.
//!
//! The [`Setting`] sentinel distinguishes "inherit from the tier above" from
//! "explicitly set to nothing". The channel constructor receives fully
//! resolved [`ChannelSettings`] and is unaware of the cascade.

mod name;

pub use name::ChannelName;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// A value at one tier of the configuration cascade.
///
/// `Inherit` defers to the tier above; `Unset` explicitly clears the value
/// ("unbounded" for `max_pending`, "disabled" for `throttle`, "no auto-nack"
/// for `timeout`); `Value` pins it.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Setting<T> {
    /// Use the value from the tier above.
    #[default]
    Inherit,
    /// Explicitly set to nothing.
    Unset,
    /// Explicitly set to a value.
    Value(T),
}

impl<T: Clone> Setting<T> {
    /// Resolves this setting against the inherited value.
    #[must_use]
    pub fn resolve(&self, inherited: Option<T>) -> Option<T> {
        match self {
            Setting::Inherit => inherited,
            Setting::Unset => None,
            Setting::Value(value) => Some(value.clone()),
        }
    }

    /// Returns `true` when this setting defers to the tier above.
    #[must_use]
    pub fn is_inherit(&self) -> bool {
        matches!(self, Setting::Inherit)
    }
}

// In serialized form `Inherit` is an absent field, `Unset` is an explicit
// `null`, and `Value` is the value itself. Pair with
// `#[serde(default, skip_serializing_if = "Setting::is_inherit")]`.
impl<T: Serialize> Serialize for Setting<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Setting::Inherit | Setting::Unset => serializer.serialize_none(),
            Setting::Value(value) => serializer.serialize_some(value),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Setting<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<T>::deserialize(deserializer)? {
            None => Setting::Unset,
            Some(value) => Setting::Value(value),
        })
    }
}

/// Severity threshold for the optional logging sink.
///
/// Only meaningful at the global tier; the engine emits `tracing` events and
/// an embedder maps this level onto whatever subscriber it installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Lifecycle chatter: throttle sleeps, timeout firings, close/clear.
    Debug,
    /// Informational events.
    Info,
    /// Recoverable anomalies, e.g. dead-lettered deliveries.
    Warn,
    /// Handler faults and failed resolution callbacks.
    Error,
}

/// Process-wide defaults, the outermost tier of the cascade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default per-delivery acknowledgment timeout in seconds.
    /// `None` or a non-positive value means deliveries never auto-nack.
    pub timeout: Option<f64>,

    /// Default bound on in-flight publishes per channel. `None` = unbounded.
    pub max_pending: Option<usize>,

    /// Default throttle threshold in `(0, 1)`; `0` disables throttling.
    pub throttle: f64,

    /// Severity threshold for the logging sink. Global tier only.
    pub log_level: Option<LogLevel>,
}

/// Bus-level overrides applied on top of [`GlobalConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BusOverrides {
    /// Override for the default acknowledgment timeout (seconds).
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub timeout: Setting<f64>,

    /// Override for the default in-flight bound.
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub max_pending: Setting<usize>,

    /// Override for the default throttle threshold.
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub throttle: Setting<f64>,
}

/// Per-channel overrides applied on top of [`BusConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelOverrides {
    /// Override for the acknowledgment timeout (seconds).
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub timeout: Setting<f64>,

    /// Override for the in-flight bound.
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub max_pending: Setting<usize>,

    /// Override for the throttle threshold.
    #[serde(skip_serializing_if = "Setting::is_inherit")]
    pub throttle: Setting<f64>,
}

/// The middle tier: global defaults with bus overrides applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Effective default acknowledgment timeout in seconds.
    pub timeout: Option<f64>,

    /// Effective default in-flight bound.
    pub max_pending: Option<usize>,

    /// Effective default throttle threshold.
    pub throttle: f64,
}

impl BusConfig {
    /// Duplicates the global tier and applies bus-level overrides.
    #[must_use]
    pub fn resolve(global: &GlobalConfig, overrides: &BusOverrides) -> Self {
        Self {
            timeout: overrides.timeout.resolve(global.timeout),
            max_pending: overrides.max_pending.resolve(global.max_pending),
            throttle: overrides
                .throttle
                .resolve(Some(global.throttle))
                .unwrap_or(0.0),
        }
    }
}

impl From<&GlobalConfig> for BusConfig {
    fn from(global: &GlobalConfig) -> Self {
        Self::resolve(global, &BusOverrides::default())
    }
}

/// Fully resolved scalars handed to the channel constructor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelSettings {
    /// Per-delivery acknowledgment timeout; `None` = deliveries never auto-nack.
    pub timeout: Option<Duration>,

    /// Bound on concurrently pending publishes; `None` = unbounded.
    pub max_pending: Option<usize>,

    /// Throttle threshold in `(0, 1)`; `0` = disabled.
    pub throttle: f64,
}

impl ChannelSettings {
    /// Resolves channel overrides against the bus tier.
    #[must_use]
    pub fn resolve(bus: &BusConfig, overrides: &ChannelOverrides) -> Self {
        Self {
            timeout: to_timeout(overrides.timeout.resolve(bus.timeout)),
            max_pending: overrides.max_pending.resolve(bus.max_pending),
            throttle: overrides
                .throttle
                .resolve(Some(bus.throttle))
                .unwrap_or(0.0),
        }
    }
}

/// Normalizes a timeout in seconds: absent, zero, or negative all mean
/// "no auto-nack", so the channel only ever sees `None` or a positive
/// duration.
fn to_timeout(seconds: Option<f64>) -> Option<Duration> {
    match seconds {
        Some(secs) if secs > 0.0 && secs.is_finite() => Some(Duration::from_secs_f64(secs)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bus_tier_duplicates_globals_when_no_overrides() {
        let global = GlobalConfig {
            timeout: Some(5.0),
            max_pending: Some(32),
            throttle: 0.5,
            log_level: Some(LogLevel::Warn),
        };
        let bus = BusConfig::from(&global);
        assert_eq!(bus.timeout, Some(5.0));
        assert_eq!(bus.max_pending, Some(32));
        assert_eq!(bus.throttle, 0.5);
    }

    #[test]
    fn bus_overrides_shadow_globals() {
        let global = GlobalConfig {
            timeout: Some(5.0),
            max_pending: Some(32),
            throttle: 0.5,
            log_level: None,
        };
        let overrides = BusOverrides {
            timeout: Setting::Value(1.0),
            max_pending: Setting::Unset,
            throttle: Setting::Inherit,
        };
        let bus = BusConfig::resolve(&global, &overrides);
        assert_eq!(bus.timeout, Some(1.0));
        assert_eq!(bus.max_pending, None, "Unset means unbounded, not inherit");
        assert_eq!(bus.throttle, 0.5);
    }

    #[test]
    fn channel_tier_resolves_against_bus_not_globals() {
        let bus = BusConfig {
            timeout: Some(2.0),
            max_pending: Some(8),
            throttle: 0.25,
        };
        let overrides = ChannelOverrides {
            timeout: Setting::Inherit,
            max_pending: Setting::Value(4),
            throttle: Setting::Unset,
        };
        let settings = ChannelSettings::resolve(&bus, &overrides);
        assert_eq!(settings.timeout, Some(Duration::from_secs_f64(2.0)));
        assert_eq!(settings.max_pending, Some(4));
        assert_eq!(settings.throttle, 0.0, "Unset throttle means disabled");
    }

    #[test]
    fn zero_timeout_normalizes_to_none() {
        let bus = BusConfig {
            timeout: Some(0.0),
            ..BusConfig::default()
        };
        let settings = ChannelSettings::resolve(&bus, &ChannelOverrides::default());
        assert_eq!(settings.timeout, None);

        let overrides = ChannelOverrides {
            timeout: Setting::Value(-1.0),
            ..ChannelOverrides::default()
        };
        let settings = ChannelSettings::resolve(&bus, &overrides);
        assert_eq!(settings.timeout, None);
    }

    #[test]
    fn setting_roundtrips_through_serde() {
        #[derive(Serialize, Deserialize)]
        struct Probe {
            #[serde(default, skip_serializing_if = "Setting::is_inherit")]
            value: Setting<u32>,
        }

        let probe: Probe = serde_json::from_str("{}").expect("empty object should parse");
        assert_eq!(probe.value, Setting::Inherit);

        let probe: Probe = serde_json::from_str(r#"{"value":null}"#).expect("null should parse");
        assert_eq!(probe.value, Setting::Unset);

        let probe: Probe = serde_json::from_str(r#"{"value":7}"#).expect("value should parse");
        assert_eq!(probe.value, Setting::Value(7));
    }

    #[test]
    fn global_config_rejects_unknown_fields() {
        let parsed: Result<GlobalConfig, _> = serde_json::from_str(r#"{"tmeout": 3.0}"#);
        assert!(parsed.is_err(), "typoed field should be rejected");
    }
}
