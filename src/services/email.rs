use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::{
    config::Settings,
    error::EmailError,
    models::{alert_type_label, AlertRule, MarketSnapshot},
};

use super::evaluator::format_volume;

#[async_trait]
pub trait EmailTransport: Send + Sync {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError>;
}

/// Posts messages to an HTTP mail relay as JSON with a bearer key.
#[derive(Clone)]
pub struct HttpEmailTransport {
    http: Client,
    api_url: String,
    api_key: String,
    from: String,
    from_name: String,
}

impl HttpEmailTransport {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            http: Client::new(),
            api_url: settings.email_api_url.trim().to_string(),
            api_key: settings.email_api_key.clone(),
            from: settings.email_from.clone(),
            from_name: settings.email_from_name.clone(),
        }
    }

    fn is_configured(&self) -> bool {
        !self.api_url.is_empty()
    }
}

#[async_trait]
impl EmailTransport for HttpEmailTransport {
    async fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), EmailError> {
        if !self.is_configured() {
            return Err(EmailError::NotConfigured);
        }

        let to = sanitize_header(to);
        let subject = sanitize_header(subject);

        let payload = json!({
            "from": { "email": sanitize_header(&self.from), "name": sanitize_header(&self.from_name) },
            "to": [ { "email": to } ],
            "subject": subject,
            "html": html_body,
        });

        let mut req = self.http.post(&self.api_url).json(&payload);
        if !self.api_key.trim().is_empty() {
            req = req.bearer_auth(&self.api_key);
        }

        let res = req.send().await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(EmailError::Rejected { status, body });
        }

        tracing::info!(to = %to, subject = %subject, "alert email sent");
        Ok(())
    }
}

/// Strips CR/LF so values can't inject extra headers.
pub fn sanitize_header(s: &str) -> String {
    s.replace(['\r', '\n'], "")
}

fn esc(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

pub fn alert_subject(rule: &AlertRule) -> String {
    format!("Alert: {} {}", rule.symbol, alert_type_label(&rule.alert_type))
}

pub fn alert_body(
    rule: &AlertRule,
    snapshot: &MarketSnapshot,
    condition_met: &str,
    frontend_url: &str,
) -> String {
    let change = snapshot
        .change_pct
        .map(|c| format!("{c:+.2}%"))
        .unwrap_or_else(|| "n/a".to_string());
    let link = match rule.watch_list_id {
        Some(wl) => format!("{frontend_url}/watchlist/{}", wl.to_hex()),
        None => format!("{frontend_url}/alerts"),
    };

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="UTF-8"></head>
<body style="font-family: sans-serif; max-width: 600px; margin: 0 auto; padding: 20px;">
  <h2>Alert Triggered: {name}</h2>
  <p>{reason}</p>
  <table style="width: 100%; border-collapse: collapse;">
    <tr><td><strong>Symbol</strong></td><td style="text-align: right;">{symbol}</td></tr>
    <tr><td><strong>Current Price</strong></td><td style="text-align: right;">${price:.2}</td></tr>
    <tr><td><strong>Change</strong></td><td style="text-align: right;">{change}</td></tr>
    <tr><td><strong>Volume</strong></td><td style="text-align: right;">{volume}</td></tr>
  </table>
  <p><a href="{link}">View Watchlist</a></p>
  <p style="color: #888; font-size: 12px;">
    You received this email because email alerts are enabled for this rule.
    Manage them in your <a href="{frontend_url}/settings">account settings</a>.
  </p>
</body>
</html>"#,
        name = esc(&rule.name),
        reason = esc(condition_met),
        symbol = esc(&snapshot.symbol),
        price = snapshot.price,
        change = change,
        volume = format_volume(snapshot.volume as f64),
        link = esc(&link),
        frontend_url = esc(frontend_url),
    )
}
