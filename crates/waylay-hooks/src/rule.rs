//! Compiled hook rules.
//!
//! A [`HookRule`] is a [`HookSetup`] with its mask compiled and its hit
//! bookkeeping attached. Masks are tested with [`Regex::is_match`], so a
//! pattern matches if it is found anywhere in the interceptor ID. Rules
//! created from a manual decision are anchored to one exact ID instead.

use regex::Regex;
use serde::Serialize;
use waylay_core::hooks::{HookAction, HookConfiguration, HookSetup, UNBOUNDED_HITS};
use waylay_core::ids::{InterceptorId, RuleId};

use crate::errors::{HookError, Result};

/// One automation rule.
#[derive(Debug, Clone)]
pub struct HookRule {
    id: RuleId,
    mask: Regex,
    action: HookAction,
    delay_ms: u64,
    hit_count: u64,
    hit_limit: i64,
}

/// Serializable view of a rule, for listings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    /// Rule ID.
    pub id: RuleId,
    /// Mask source.
    pub uuid_mask: String,
    /// Action on match.
    pub action: HookAction,
    /// Pass-through delay.
    pub delay_ms: u64,
    /// Matches so far.
    pub hit_count: u64,
    /// Remaining matches, `-1` for unbounded.
    pub hit_limit: i64,
}

impl HookRule {
    /// Compile `setup`.
    pub fn from_setup(setup: &HookSetup) -> Result<Self> {
        let mask = Regex::new(&setup.uuid_mask).map_err(|source| HookError::InvalidMask {
            mask: setup.uuid_mask.clone(),
            source,
        })?;
        Ok(Self {
            id: RuleId::new(),
            mask,
            action: setup.action,
            delay_ms: setup.delay_ms,
            hit_count: 0,
            hit_limit: setup.hit_limit,
        })
    }

    /// Unbounded rule matching exactly `interceptor`.
    pub fn exact(interceptor: &InterceptorId, config: HookConfiguration) -> Result<Self> {
        let setup = HookSetup {
            uuid_mask: format!("^{}$", regex::escape(interceptor.as_str())),
            action: config.action,
            delay_ms: config.delay_ms,
            hit_limit: UNBOUNDED_HITS,
        };
        Self::from_setup(&setup)
    }

    /// Rule ID.
    #[must_use]
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    /// Mask source.
    #[must_use]
    pub fn mask(&self) -> &str {
        self.mask.as_str()
    }

    /// Action on match.
    #[must_use]
    pub fn action(&self) -> HookAction {
        self.action
    }

    /// Pass-through delay in milliseconds.
    #[must_use]
    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    /// Number of captures this rule has handled.
    #[must_use]
    pub fn hit_count(&self) -> u64 {
        self.hit_count
    }

    /// Remaining matches, `-1` for unbounded.
    #[must_use]
    pub fn hit_limit(&self) -> i64 {
        self.hit_limit
    }

    /// Whether the rule has no matches left.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.hit_limit == 0
    }

    /// Whether the rule applies to captures from `interceptor`.
    #[must_use]
    pub fn matches(&self, interceptor: &InterceptorId) -> bool {
        !self.is_exhausted() && self.mask.is_match(interceptor.as_str())
    }

    /// Count one match against this rule.
    pub fn record_hit(&mut self) {
        self.hit_count += 1;
        if self.hit_limit > 0 {
            self.hit_limit -= 1;
        }
    }

    /// Configuration this rule would be rebuilt from, with the current
    /// remaining hit limit.
    #[must_use]
    pub fn to_setup(&self) -> HookSetup {
        HookSetup {
            uuid_mask: self.mask.as_str().to_owned(),
            action: self.action,
            delay_ms: self.delay_ms,
            hit_limit: self.hit_limit,
        }
    }

    /// Serializable snapshot.
    #[must_use]
    pub fn info(&self) -> RuleInfo {
        RuleInfo {
            id: self.id.clone(),
            uuid_mask: self.mask.as_str().to_owned(),
            action: self.action,
            delay_ms: self.delay_ms,
            hit_count: self.hit_count,
            hit_limit: self.hit_limit,
        }
    }
}
