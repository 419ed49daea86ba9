//! Browser token extractor (§1.1 supplemented ambient feature,
//! `scripts/extract_slack_token.py` in the original): a one-time setup
//! helper, not part of the always-running host, that drives a system
//! browser against a virtual display to pull a browser-session Slack token
//! for workspaces that authenticate without a bot-token app.

use std::env;
use std::process::Command;

use tracing::info;

use crate::error::{HostError, Result};

const DEFAULT_VIRTUAL_DISPLAY: &str = ":99";

/// `DISPLAY` env var (§9 "global os.environ manipulation ... scoped
/// resource that restores the prior value on exit"): overrides `DISPLAY`
/// for the lifetime of this guard, restoring whatever was there before
/// (or removing the var entirely if it was unset) when dropped.
struct DisplayGuard {
    previous: Option<String>,
}

impl DisplayGuard {
    fn scoped(display: &str) -> Self {
        let previous = env::var("DISPLAY").ok();
        env::set_var("DISPLAY", display);
        Self { previous }
    }
}

impl Drop for DisplayGuard {
    fn drop(&mut self) {
        match &self.previous {
            Some(value) => env::set_var("DISPLAY", value),
            None => env::remove_var("DISPLAY"),
        }
    }
}

/// Runs the extraction flow for `service` (currently only `"slack"`) against
/// `virtual_display` (defaults to `:99`, matching a typical `Xvfb` setup),
/// launching `browser_bin` to complete the login and scraping the session
/// token from its output.
pub fn extract_token(service: &str, browser_bin: &str, virtual_display: Option<&str>) -> Result<String> {
    if service != "slack" {
        return Err(HostError::TokenExtract(format!("unsupported token extraction target {service}")));
    }

    let display = virtual_display.unwrap_or(DEFAULT_VIRTUAL_DISPLAY);
    let _guard = DisplayGuard::scoped(display);
    info!(display, browser_bin, "starting browser session for slack token extraction");

    let output = Command::new(browser_bin)
        .args(["--headless=new", "--dump-dom", "https://app.slack.com/client"])
        .output()
        .map_err(|e| HostError::TokenExtract(format!("failed to launch {browser_bin}: {e}")))?;

    if !output.status.success() {
        return Err(HostError::TokenExtract(format!("browser exited with {:?}", output.status)));
    }

    let dom = String::from_utf8_lossy(&output.stdout);
    extract_token_from_dom(&dom)
}

/// Slack's browser session token is carried in a `localConfig_v2` blob as
/// `"token":"xoxc-..."`, cookie-bound and only valid alongside the session
/// `d` cookie — this pulls just the bearer value, the cookie jar is the
/// browser's own responsibility to have already persisted.
fn extract_token_from_dom(dom: &str) -> Result<String> {
    let marker = "\"token\":\"";
    let start = dom.find(marker).ok_or_else(|| HostError::TokenExtract("token marker not found in DOM".to_string()))?;
    let rest = &dom[start + marker.len()..];
    let end = rest.find('"').ok_or_else(|| HostError::TokenExtract("unterminated token value".to_string()))?;
    let token = &rest[..end];
    if !token.starts_with("xoxc-") {
        return Err(HostError::TokenExtract(format!("unexpected token shape: {token}")));
    }
    Ok(token.to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    // DISPLAY is process-global; serialize the two tests that touch it so
    // they can't interleave across test threads.
    static DISPLAY_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn display_guard_restores_previous_value() {
        let _lock = DISPLAY_LOCK.lock().unwrap();
        env::set_var("DISPLAY", ":0");
        {
            let _guard = DisplayGuard::scoped(":99");
            assert_eq!(env::var("DISPLAY").unwrap(), ":99");
        }
        assert_eq!(env::var("DISPLAY").unwrap(), ":0");
    }

    #[test]
    fn display_guard_removes_var_if_previously_unset() {
        let _lock = DISPLAY_LOCK.lock().unwrap();
        env::remove_var("DISPLAY");
        {
            let _guard = DisplayGuard::scoped(":99");
            assert_eq!(env::var("DISPLAY").unwrap(), ":99");
        }
        assert!(env::var("DISPLAY").is_err());
    }

    #[test]
    fn extract_token_from_dom_finds_xoxc_token() {
        let dom = r#"window.localConfig_v2 = {"token":"xoxc-123-456","other":"x"};"#;
        assert_eq!(extract_token_from_dom(dom).unwrap(), "xoxc-123-456");
    }

    #[test]
    fn extract_token_from_dom_rejects_missing_marker() {
        assert!(extract_token_from_dom("no token here").is_err());
    }
}
