//! Provider REST client: outbound call initiation and TwiML generation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::config::TelephonyConfig;

const API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// TwiML that greets the caller, then connects the media stream. The
/// greeting establishes the audio path before streaming begins.
pub fn greeting_twiml(ws_url: &str) -> String {
    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            "<Response>",
            r#"<Say voice="Polly.Amy">Hello, how can I help you today?</Say>"#,
            "<Connect>",
            r#"<Stream url="{}" track="inbound_track"/>"#,
            "</Connect>",
            "</Response>"
        ),
        xml_escape(ws_url)
    )
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[derive(Debug, Deserialize)]
pub struct OutboundCall {
    pub sid: String,
    pub status: String,
}

pub struct TelephonyClient {
    config: TelephonyConfig,
    http: reqwest::Client,
}

impl TelephonyClient {
    pub fn new(config: &TelephonyConfig) -> Self {
        Self {
            config: config.clone(),
            http: reqwest::Client::new(),
        }
    }

    /// Place an outbound call that connects its media stream to `ws_url`.
    pub async fn create_call(&self, to_number: &str, ws_url: &str) -> Result<OutboundCall> {
        if self.config.account_sid.is_empty() || self.config.auth_token.is_empty() {
            bail!("telephony credentials not configured");
        }
        if self.config.phone_number.is_empty() {
            bail!("no outbound caller number configured");
        }

        let twiml = greeting_twiml(ws_url);
        let url = format!("{API_BASE}/Accounts/{}/Calls.json", self.config.account_sid);

        let response = self
            .http
            .post(&url)
            .basic_auth(&self.config.account_sid, Some(&self.config.auth_token))
            .form(&[
                ("To", to_number),
                ("From", self.config.phone_number.as_str()),
                ("Twiml", twiml.as_str()),
            ])
            .send()
            .await
            .context("failed to reach telephony API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("telephony API error ({status}): {body}");
        }

        let call: OutboundCall = response
            .json()
            .await
            .context("failed to parse call creation response")?;
        info!(call_sid = %call.sid, to = to_number, status = %call.status, "outbound call created");
        Ok(call)
    }
}
