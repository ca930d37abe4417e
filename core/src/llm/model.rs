//! Model call parameters.

use alloc::{collections::BTreeMap, string::String, sync::Arc};
use core::fmt;

use serde_json::Value;

use crate::cancel::CancelToken;

/// Requested reasoning effort for thinking-capable models.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ReasoningEffort {
    /// No reasoning requested.
    #[default]
    Off,
    /// Minimal reasoning.
    Minimal,
    /// Low effort.
    Low,
    /// Medium effort.
    Medium,
    /// High effort.
    High,
    /// Extra-high effort; providers that do not advertise it map it to High.
    XHigh,
}

impl ReasoningEffort {
    /// Clamps `XHigh` down to `High` for models that do not advertise it.
    #[must_use]
    pub fn clamp(self, supports_xhigh: bool) -> Self {
        if self == Self::XHigh && !supports_xhigh {
            Self::High
        } else {
            self
        }
    }
}

/// Prompt-cache retention hint forwarded to the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum CacheRetention {
    /// No caching requested.
    #[default]
    Off,
    /// Short-lived cache entries.
    Short,
    /// Long-lived cache entries.
    Long,
}

/// Debug hook receiving the raw request payload a provider is about to send.
pub type PayloadHook = Arc<dyn Fn(&Value) + Send + Sync>;

/// Options for one streaming model call.
#[derive(Clone, Default)]
pub struct StreamOptions {
    /// Sampling temperature.
    pub temperature: Option<f32>,
    /// Output token budget.
    pub max_tokens: Option<u32>,
    /// Reasoning effort.
    pub reasoning: ReasoningEffort,
    /// Cooperative cancellation flag the provider must poll.
    pub signal: CancelToken,
    /// Explicit API key; falls back to the provider's configured key.
    pub api_key: Option<String>,
    /// Prompt-cache retention hint.
    pub cache_retention: CacheRetention,
    /// Extra request headers.
    pub headers: BTreeMap<String, String>,
    /// Upper bound on provider-internal retry backoff.
    pub max_retry_delay_ms: Option<u64>,
    /// Debug hook invoked with the raw request payload.
    pub on_payload: Option<PayloadHook>,
}

impl fmt::Debug for StreamOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamOptions")
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("reasoning", &self.reasoning)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("cache_retention", &self.cache_retention)
            .field("headers", &self.headers)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("on_payload", &self.on_payload.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

impl StreamOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the output token budget.
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Sets the reasoning effort.
    #[must_use]
    pub const fn with_reasoning(mut self, reasoning: ReasoningEffort) -> Self {
        self.reasoning = reasoning;
        self
    }

    /// Sets the cancellation signal.
    #[must_use]
    pub fn with_signal(mut self, signal: CancelToken) -> Self {
        self.signal = signal;
        self
    }
}
