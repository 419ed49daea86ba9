//! Shared types for the scheduler (§4.7).

use async_trait::async_trait;
use chrono_tz::Tz;
use pynchy_store::ScheduledTask;

/// Resolve the scheduler's effective timezone (§0 "`$TZ`, then
/// `/etc/localtime`, then `UTC`"). `configured` is `scheduler.timezone`
/// from `config.toml`; an empty string means auto-detect.
pub fn resolve_timezone(configured: &str) -> Tz {
    if !configured.is_empty() {
        if let Ok(tz) = configured.parse::<Tz>() {
            return tz;
        }
        tracing::warn!(configured, "unrecognized scheduler.timezone, falling back to auto-detect");
    }

    if let Ok(env_tz) = std::env::var("TZ") {
        if let Ok(tz) = env_tz.parse::<Tz>() {
            return tz;
        }
    }

    if let Some(tz) = localtime_zone_name() {
        if let Ok(tz) = tz.parse::<Tz>() {
            return tz;
        }
    }

    Tz::UTC
}

/// Best-effort IANA zone name from the `/etc/localtime` symlink target,
/// e.g. `/usr/share/zoneinfo/America/New_York` -> `America/New_York`.
fn localtime_zone_name() -> Option<String> {
    let target = std::fs::read_link("/etc/localtime").ok()?;
    let s = target.to_str()?;
    let idx = s.find("zoneinfo/")?;
    Some(s[idx + "zoneinfo/".len()..].to_string())
}

/// What the task runner reports back to the engine after executing one
/// scheduled task (§4.7 step 3-4).
#[derive(Debug, Clone)]
pub struct TaskRunOutcome {
    pub success: bool,
    /// 200-char-truncated-on-persist summary of the result (or error).
    pub result_summary: String,
}

impl TaskRunOutcome {
    pub fn ok(summary: impl Into<String>) -> Self {
        Self { success: true, result_summary: summary.into() }
    }

    pub fn failed(summary: impl Into<String>) -> Self {
        Self { success: false, result_summary: summary.into() }
    }
}

/// Narrow seam between the scheduler engine and the one-shot container
/// run it drives (§4.2/§4.7), so the engine doesn't need to own a
/// `SessionManager`, workspace queues, or the git coordinator directly.
/// The concrete implementation lives with whatever owns the workspace
/// queues (the router).
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_task(&self, task: &ScheduledTask) -> TaskRunOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_timezone_falls_back_to_utc_for_garbage() {
        let tz = resolve_timezone("Not/AZone");
        assert_eq!(tz, Tz::UTC);
    }

    #[test]
    fn resolve_timezone_honors_explicit_config() {
        let tz = resolve_timezone("America/New_York");
        assert_eq!(tz, chrono_tz::America::New_York);
    }
}
