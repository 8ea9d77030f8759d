//! Hook rule configuration types.
//!
//! These are the serializable shapes an operator (settings file, console,
//! remote peer) uses to describe automation rules. The compiled, stateful
//! rule lives in `waylay-hooks`.

use serde::{Deserialize, Serialize};

/// Hit limit meaning "never exhausted".
pub const UNBOUNDED_HITS: i64 = -1;

/// What a matching rule does with a captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HookAction {
    /// Park the event for a manual decision.
    #[default]
    Suspend,
    /// Resolve the event unchanged, optionally after a delay.
    PassThrough,
}

impl std::fmt::Display for HookAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suspend => write!(f, "suspend"),
            Self::PassThrough => write!(f, "pass-through"),
        }
    }
}

/// Action and delay attached to a manual submission.
///
/// When present, the router registers an unbounded rule for the exact
/// interceptor ID of the submitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookConfiguration {
    /// Action for future captures.
    pub action: HookAction,
    /// Delay before a pass-through resolution.
    #[serde(default)]
    pub delay_ms: u64,
}

/// Full description of a rule to add to a router.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSetup {
    /// Regular expression tested against the interceptor ID. Unanchored: the
    /// pattern may match anywhere in the ID.
    pub uuid_mask: String,
    /// What to do on match.
    #[serde(default)]
    pub action: HookAction,
    /// Delay before a pass-through resolution.
    #[serde(default)]
    pub delay_ms: u64,
    /// Remaining matches. `-1` is unbounded, `0` disables the rule.
    #[serde(default = "default_hit_limit")]
    pub hit_limit: i64,
}

fn default_hit_limit() -> i64 {
    UNBOUNDED_HITS
}

impl HookSetup {
    /// Unbounded rule with no delay.
    #[must_use]
    pub fn new(uuid_mask: impl Into<String>, action: HookAction) -> Self {
        Self {
            uuid_mask: uuid_mask.into(),
            action,
            delay_ms: 0,
            hit_limit: UNBOUNDED_HITS,
        }
    }

    /// Set the pass-through delay.
    #[must_use]
    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set the hit limit.
    #[must_use]
    pub fn with_hit_limit(mut self, hit_limit: i64) -> Self {
        self.hit_limit = hit_limit;
        self
    }

    /// The catch-all rule an operator console starts with: suspend
    /// everything.
    #[must_use]
    pub fn suspend_all() -> Self {
        Self::new(".*", HookAction::Suspend)
    }
}
