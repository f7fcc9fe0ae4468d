//! Event handler configuration.

use std::sync::Arc;

use vesper_core::{FlagError, FlagKind, FlagSpec, FlagValue, Flags, ThreadRegistry};

/// Default notification tokens per descriptor and port.
pub const DEFAULT_TOKEN_COUNT: u32 = 16;

/// Default number of readiness events fetched per wait.
pub const DEFAULT_MAX_EVENTS: usize = 16;

const DEFAULT_THREAD_NAME: &str = "vesper-io";

/// Configuration for [`EventHandler::start`](crate::EventHandler::start).
#[derive(Debug, Clone)]
pub struct EventHandlerConfig {
    /// Readiness events fetched from the poller per wakeup.
    ///
    /// Default: 16
    pub max_events: usize,

    /// Readiness notifications a port may have outstanding for one
    /// descriptor before it must return tokens.
    ///
    /// Default: 16
    pub token_count: u32,

    /// Name of the handler thread.
    ///
    /// Default: "vesper-io"
    pub thread_name: String,

    /// Registry the handler thread joins for its lifetime.
    ///
    /// Default: None
    pub registry: Option<Arc<ThreadRegistry>>,
}

impl EventHandlerConfig {
    /// Build a configuration from command-line style flags, returning the
    /// arguments that were not flags.
    pub fn from_args<'a, I>(args: I) -> Result<(Self, Vec<&'a str>), FlagError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut config = EventHandlerConfig::default();
        let rest = Flags::new(EVENT_HANDLER_FLAGS).parse(args, &mut config)?;
        Ok((config, rest))
    }
}

impl Default for EventHandlerConfig {
    fn default() -> Self {
        EventHandlerConfig {
            max_events: DEFAULT_MAX_EVENTS,
            token_count: DEFAULT_TOKEN_COUNT,
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            registry: None,
        }
    }
}

/// Flag schema for [`EventHandlerConfig`].
pub static EVENT_HANDLER_FLAGS: &[FlagSpec<EventHandlerConfig>] = &[
    FlagSpec {
        name: "io_max_events",
        kind: FlagKind::Int,
        default: FlagValue::Int(DEFAULT_MAX_EVENTS as i64),
        help: "Readiness events fetched per event handler wakeup",
        setter: |c, v| {
            c.max_events = usize::try_from(v.as_int().unwrap_or(0))
                .ok()
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_MAX_EVENTS)
        },
    },
    FlagSpec {
        name: "io_token_count",
        kind: FlagKind::Int,
        default: FlagValue::Int(DEFAULT_TOKEN_COUNT as i64),
        help: "Outstanding notifications allowed per descriptor",
        setter: |c, v| {
            c.token_count = u32::try_from(v.as_int().unwrap_or(0))
                .ok()
                .filter(|&n| n > 0)
                .unwrap_or(DEFAULT_TOKEN_COUNT)
        },
    },
    FlagSpec {
        name: "io_thread_name",
        kind: FlagKind::Str,
        default: FlagValue::Str(DEFAULT_THREAD_NAME),
        help: "Name of the event handler thread",
        setter: |c, v| c.thread_name = v.as_str().unwrap_or(DEFAULT_THREAD_NAME).to_string(),
    },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_args() {
        let args = ["--io-max-events=64", "--io_token_count=4", "app"];
        let (config, rest) = EventHandlerConfig::from_args(args).unwrap();
        assert_eq!(config.max_events, 64);
        assert_eq!(config.token_count, 4);
        assert_eq!(config.thread_name, "vesper-io");
        assert_eq!(rest, vec!["app"]);

        let (config, _) = EventHandlerConfig::from_args(["--io-thread-name=io-0"]).unwrap();
        assert_eq!(config.thread_name, "io-0");
    }

    #[test]
    fn test_non_positive_values_fall_back() {
        let args = ["--io-max-events=0", "--io-token-count=-3"];
        let (config, _) = EventHandlerConfig::from_args(args).unwrap();
        assert_eq!(config.max_events, DEFAULT_MAX_EVENTS);
        assert_eq!(config.token_count, DEFAULT_TOKEN_COUNT);
    }
}
