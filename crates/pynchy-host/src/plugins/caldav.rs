//! CalDAV calendar tool (§1.1 supplemented ambient feature): a thin
//! `reqwest`-backed wrapper around `[caldav.servers.<name>]`, exposed to
//! containers as `service:caldav` rather than a dedicated MCP server because
//! a calendar is just a handful of WebDAV verbs over HTTP.

use std::collections::HashMap;

use async_trait::async_trait;
use pynchy_core::config::CaldavServerConfig;
use reqwest::Client;
use serde_json::{json, Value};

use super::ServiceHandler;

const CALENDAR_QUERY_BODY: &str = r#"<?xml version="1.0" encoding="utf-8" ?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag />
    <c:calendar-data />
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT" />
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#;

pub struct CaldavService {
    client: Client,
    servers: HashMap<String, CaldavServerConfig>,
}

impl CaldavService {
    pub fn new(servers: HashMap<String, CaldavServerConfig>) -> Self {
        Self { client: Client::new(), servers }
    }

    fn server(&self, name: &str) -> anyhow::Result<&CaldavServerConfig> {
        self.servers.get(name).ok_or_else(|| anyhow::anyhow!("unknown caldav server {name}"))
    }

    fn calendar_url(&self, server: &CaldavServerConfig, calendar: Option<&str>) -> anyhow::Result<String> {
        let calendar = calendar.or(server.default_calendar.as_deref()).ok_or_else(|| {
            anyhow::anyhow!("no calendar given and server has no default_calendar configured")
        })?;
        if !server.allow.is_empty() && !server.allow.iter().any(|c| c == calendar) {
            anyhow::bail!("calendar {calendar} is not in the allow list for this caldav server");
        }
        if server.ignore.iter().any(|c| c == calendar) {
            anyhow::bail!("calendar {calendar} is ignored for this caldav server");
        }
        Ok(format!("{}/{}/", server.url.trim_end_matches('/'), calendar))
    }

    async fn list_events(&self, server_name: &str, calendar: Option<&str>) -> anyhow::Result<Value> {
        let server = self.server(server_name)?;
        let url = self.calendar_url(server, calendar)?;
        let resp = self
            .client
            .request(reqwest::Method::from_bytes(b"REPORT").unwrap(), &url)
            .basic_auth(&server.username, Some(&server.password))
            .header("Content-Type", "application/xml; charset=utf-8")
            .header("Depth", "1")
            .body(CALENDAR_QUERY_BODY)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("caldav REPORT {url} failed: {}", resp.status());
        }
        let body = resp.text().await?;
        Ok(json!({ "calendar": url, "raw_multistatus": body }))
    }

    async fn create_event(&self, server_name: &str, calendar: Option<&str>, uid: &str, ics: &str) -> anyhow::Result<Value> {
        let server = self.server(server_name)?;
        let url = format!("{}{uid}.ics", self.calendar_url(server, calendar)?);
        let resp = self
            .client
            .put(&url)
            .basic_auth(&server.username, Some(&server.password))
            .header("Content-Type", "text/calendar; charset=utf-8")
            .body(ics.to_string())
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("caldav PUT {url} failed: {}", resp.status());
        }
        Ok(json!({ "url": url, "status": resp.status().as_u16() }))
    }
}

#[async_trait]
impl ServiceHandler for CaldavService {
    fn name(&self) -> &str {
        "caldav"
    }

    async fn call(&self, _folder: &str, payload: Value) -> anyhow::Result<Value> {
        let server_name = payload
            .get("server")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("caldav call missing \"server\""))?;
        let calendar = payload.get("calendar").and_then(Value::as_str);
        let action = payload.get("action").and_then(Value::as_str).unwrap_or("list_events");

        match action {
            "list_events" => self.list_events(server_name, calendar).await,
            "create_event" => {
                let uid = payload
                    .get("uid")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("caldav create_event missing \"uid\""))?;
                let ics = payload
                    .get("ics")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("caldav create_event missing \"ics\""))?;
                self.create_event(server_name, calendar, uid, ics).await
            }
            other => anyhow::bail!("unknown caldav action {other}"),
        }
    }
}
