use serde::{Deserialize, Serialize};

use pynchy_core::config::RiskTier;

/// Result of `SecurityGate::evaluate_write` (§4.10). `allowed = false` with
/// `needs_human = false` is a hard block (policy denial or rate limit);
/// `needs_human = true` means the caller must route through the approval
/// state machine (§4.8) and the MCP proxy (§4.6) must pause the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteVerdict {
    pub allowed: bool,
    pub needs_human: bool,
    pub reason: Option<String>,
}

impl WriteVerdict {
    pub fn allow() -> Self {
        Self { allowed: true, needs_human: false, reason: None }
    }

    pub fn needs_human(reason: impl Into<String>) -> Self {
        Self { allowed: false, needs_human: true, reason: Some(reason.into()) }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self { allowed: false, needs_human: false, reason: Some(reason.into()) }
    }
}

/// One hour sliding-window bucket of per-tool call counts, keyed by the
/// UTC hour the calls landed in. Simpler than a true sliding window and
/// sufficient for the spec's "per-workspace per-hour" requirement — a
/// bucket rollover at the hour boundary briefly permits a burst, which is
/// an accepted approximation (noted in DESIGN.md).
#[derive(Debug, Clone, Default)]
pub struct RateWindow {
    pub hour_bucket: i64,
    pub counts: std::collections::HashMap<String, u32>,
}

/// Grounds the tiered write policy: per-tool risk tier resolved by name
/// lookup with workspace-default fallback, admin bypass of human approval,
/// and rate limiting with per-tool overrides.
#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub is_admin: bool,
    pub tool_tiers: std::collections::HashMap<String, RiskTier>,
    pub default_tier: RiskTier,
    pub max_calls_per_hour: u32,
    pub tool_rate_limits: std::collections::HashMap<String, u32>,
}

impl GatePolicy {
    pub fn tier_for(&self, tool_name: &str) -> RiskTier {
        self.tool_tiers.get(tool_name).copied().unwrap_or(self.default_tier)
    }

    pub fn rate_limit_for(&self, tool_name: &str) -> u32 {
        self.tool_rate_limits
            .get(tool_name)
            .copied()
            .unwrap_or(self.max_calls_per_hour)
    }
}
