use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use pynchy_core::config::RiskTier;

use crate::types::{GatePolicy, RateWindow, WriteVerdict};

/// Security gate for one `(folder, invocation_ts)` pair (§4.10). One gate is
/// created per in-container agent invocation and consulted for every MCP
/// `tools/call` the container makes during that invocation. `evaluate_read`
/// sets a taint bit consumed by later `evaluate_write` calls so a session
/// that has read from an untrusted/public MCP source is held to a stricter
/// write policy — gating exfiltration, not just destructive writes.
pub struct SecurityGate {
    policy: GatePolicy,
    window: Mutex<RateWindow>,
    tainted_sources: Mutex<HashSet<String>>,
}

impl SecurityGate {
    pub fn new(policy: GatePolicy) -> Self {
        Self {
            policy,
            window: Mutex::new(RateWindow::default()),
            tainted_sources: Mutex::new(HashSet::new()),
        }
    }

    /// Taint-only: records that this invocation has consumed content
    /// originating from `instance_id`. Never denies.
    #[tracing::instrument(skip(self))]
    pub fn evaluate_read(&self, instance_id: &str) {
        let mut tainted = self.tainted_sources.lock().expect("gate taint set poisoned");
        if tainted.insert(instance_id.to_string()) {
            debug!(instance_id, "gate: marked instance as read-tainted");
        }
    }

    /// True if this invocation has read from any instance.
    pub fn is_tainted(&self) -> bool {
        !self.tainted_sources.lock().expect("gate taint set poisoned").is_empty()
    }

    /// Tiered write policy (§4.10): resolve the tool's risk tier (per-tool
    /// override falling back to the workspace default), then rate-limit,
    /// then decide per tier. Admin workspaces bypass human approval but are
    /// still subject to rate limits and outright denials.
    #[tracing::instrument(skip(self, _params))]
    pub fn evaluate_write(&self, instance_id: &str, tool_name: &str, _params: &serde_json::Value) -> WriteVerdict {
        if let Some(reason) = self.check_rate_limit(tool_name) {
            warn!(instance_id, tool_name, reason, "gate: rate limit exceeded");
            return WriteVerdict::deny(reason);
        }

        match self.policy.tier_for(tool_name) {
            RiskTier::AlwaysApprove => WriteVerdict::allow(),
            RiskTier::RulesEngine => {
                // Built-in rule: deny (escalate to human) a write through an
                // instance different from the one this invocation already
                // read tainted content from — an exfiltration heuristic,
                // not a full DLP engine.
                let tainted = self.tainted_sources.lock().expect("gate taint set poisoned");
                if !tainted.is_empty() && !tainted.contains(instance_id) {
                    WriteVerdict::needs_human(format!(
                        "tool {tool_name} would write via {instance_id} after reading from a different, tainted source"
                    ))
                } else {
                    WriteVerdict::allow()
                }
            }
            RiskTier::HumanApproval => {
                if self.policy.is_admin {
                    WriteVerdict::allow()
                } else {
                    WriteVerdict::needs_human(format!("tool {tool_name} requires human approval"))
                }
            }
        }
    }

    fn check_rate_limit(&self, tool_name: &str) -> Option<String> {
        let limit = self.policy.rate_limit_for(tool_name);
        let hour_bucket = Utc::now().timestamp() / 3600;
        let mut window = self.window.lock().expect("gate rate window poisoned");
        if window.hour_bucket != hour_bucket {
            window.hour_bucket = hour_bucket;
            window.counts.clear();
        }
        let count = window.counts.entry(tool_name.to_string()).or_insert(0);
        *count += 1;
        if *count > limit {
            Some(format!("{tool_name} exceeded {limit} calls/hour"))
        } else {
            None
        }
    }
}

/// Process-wide registry of active gates, keyed by `(folder, invocation_ts)`.
/// The MCP proxy (§4.6) looks up the gate for an inbound request's folder +
/// invocation timestamp; a missing gate is a 403 (no invocation was ever
/// registered for that pair).
#[derive(Default)]
pub struct GateRegistry {
    gates: DashMap<(String, String), std::sync::Arc<SecurityGate>>,
}

impl GateRegistry {
    pub fn new() -> Self {
        Self { gates: DashMap::new() }
    }

    pub fn register(&self, folder: &str, invocation_ts: &str, policy: GatePolicy) -> std::sync::Arc<SecurityGate> {
        let gate = std::sync::Arc::new(SecurityGate::new(policy));
        self.gates.insert((folder.to_string(), invocation_ts.to_string()), gate.clone());
        gate
    }

    pub fn get(&self, folder: &str, invocation_ts: &str) -> Option<std::sync::Arc<SecurityGate>> {
        self.gates.get(&(folder.to_string(), invocation_ts.to_string())).map(|e| e.clone())
    }

    /// Invocations end when the container session ends; the gate is no
    /// longer needed once the MCP proxy stops seeing requests for it.
    pub fn unregister(&self, folder: &str, invocation_ts: &str) {
        self.gates.remove(&(folder.to_string(), invocation_ts.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn policy(is_admin: bool) -> GatePolicy {
        GatePolicy {
            is_admin,
            tool_tiers: HashMap::new(),
            default_tier: RiskTier::RulesEngine,
            max_calls_per_hour: 5,
            tool_rate_limits: HashMap::new(),
        }
    }

    #[test]
    fn always_approve_tier_allows_without_human() {
        let mut p = policy(false);
        p.tool_tiers.insert("read_file".into(), RiskTier::AlwaysApprove);
        let gate = SecurityGate::new(p);
        let verdict = gate.evaluate_write("inst", "read_file", &serde_json::json!({}));
        assert!(verdict.allowed);
        assert!(!verdict.needs_human);
    }

    #[test]
    fn human_approval_tier_blocked_for_non_admin() {
        let mut p = policy(false);
        p.tool_tiers.insert("delete_repo".into(), RiskTier::HumanApproval);
        let gate = SecurityGate::new(p);
        let verdict = gate.evaluate_write("inst", "delete_repo", &serde_json::json!({}));
        assert!(!verdict.allowed);
        assert!(verdict.needs_human);
    }

    #[test]
    fn human_approval_tier_bypassed_for_admin() {
        let mut p = policy(true);
        p.tool_tiers.insert("delete_repo".into(), RiskTier::HumanApproval);
        let gate = SecurityGate::new(p);
        let verdict = gate.evaluate_write("inst", "delete_repo", &serde_json::json!({}));
        assert!(verdict.allowed);
        assert!(!verdict.needs_human);
    }

    #[test]
    fn rate_limit_hard_blocks_after_threshold() {
        let gate = SecurityGate::new(policy(false));
        for _ in 0..5 {
            let v = gate.evaluate_write("inst", "search", &serde_json::json!({}));
            assert!(v.allowed);
        }
        let v = gate.evaluate_write("inst", "search", &serde_json::json!({}));
        assert!(!v.allowed);
        assert!(!v.needs_human);
    }

    #[test]
    fn taint_from_other_instance_escalates_rules_engine_tier() {
        let gate = SecurityGate::new(policy(false));
        gate.evaluate_read("public-source");
        let verdict = gate.evaluate_write("other-instance", "post", &serde_json::json!({}));
        assert!(verdict.needs_human);
    }

    #[test]
    fn registry_round_trips_gate_by_key() {
        let registry = GateRegistry::new();
        registry.register("acme", "2026-01-01T00:00:00Z", policy(false));
        assert!(registry.get("acme", "2026-01-01T00:00:00Z").is_some());
        assert!(registry.get("acme", "other").is_none());
        registry.unregister("acme", "2026-01-01T00:00:00Z");
        assert!(registry.get("acme", "2026-01-01T00:00:00Z").is_none());
    }
}
