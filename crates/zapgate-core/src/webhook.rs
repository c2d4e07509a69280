// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Webhook rules and reconciliation.
//!
//! The central store holds the desired rules for each device. A device
//! runtime holds the rules it will actually fire. Reconciliation is additive:
//! rules missing from the runtime are registered, extra runtime rules are
//! left alone.
//!
//! Two rules are the same when `(phrase, callback_url, method, number)` match.
//! The body template is not part of the identity.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::ContainerDescriptor;

/// Method used when a rule does not name one.
pub const DEFAULT_WEBHOOK_METHOD: &str = "POST";

/// Path on the device runtime that registers a webhook.
pub const REGISTER_PATH: &str = "/webhook/register";

/// Path on the device runtime that lists webhooks.
pub const LIST_PATH: &str = "/webhook/list";

/// A normalized webhook rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookRule {
    /// Trigger phrase.
    pub phrase: String,
    /// URL to call when the phrase matches.
    pub callback_url: String,
    /// HTTP method for the callback.
    pub method: String,
    /// Body template sent to the callback.
    pub body: String,
    /// Number the rule applies to.
    pub number: String,
}

/// Identity of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WebhookKey {
    phrase: String,
    callback_url: String,
    method: String,
    number: String,
}

impl WebhookRule {
    /// Identity used for de-duplication.
    pub fn key(&self) -> WebhookKey {
        WebhookKey {
            phrase: self.phrase.clone(),
            callback_url: self.callback_url.clone(),
            method: self.method.clone(),
            number: self.number.clone(),
        }
    }
}

/// Body of `POST /webhook/register`, as clients send it and as the device
/// runtime expects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterWebhookPayload {
    /// Number the rule applies to.
    #[serde(default)]
    pub number: String,
    /// Trigger phrase.
    #[serde(default)]
    pub phrase: String,
    /// Callback URL.
    #[serde(default)]
    pub callback_url: String,
    /// Callback method.
    #[serde(default)]
    pub url_method: String,
    /// Body template.
    #[serde(default)]
    pub body: String,
}

impl RegisterWebhookPayload {
    /// Validate into a rule. A missing method becomes `POST`; every other
    /// field is kept exactly as sent.
    pub fn into_rule(self) -> Result<WebhookRule> {
        if self.callback_url.trim().is_empty() {
            return Err(Error::Validation("callback_url is required".to_string()));
        }
        let method = if self.url_method.is_empty() {
            DEFAULT_WEBHOOK_METHOD.to_string()
        } else {
            self.url_method
        };
        Ok(WebhookRule {
            phrase: self.phrase,
            callback_url: self.callback_url,
            method,
            body: self.body,
            number: self.number,
        })
    }
}

impl From<&WebhookRule> for RegisterWebhookPayload {
    fn from(rule: &WebhookRule) -> Self {
        Self {
            number: rule.number.clone(),
            phrase: rule.phrase.clone(),
            callback_url: rule.callback_url.clone(),
            url_method: rule.method.clone(),
            body: rule.body.clone(),
        }
    }
}

/// One rule as returned by `POST /webhook/list`. The runtime emits
/// capitalized keys; snake case is accepted too.
#[derive(Debug, Deserialize)]
struct ListedRule {
    #[serde(rename = "Phrase", alias = "phrase", default)]
    phrase: String,
    #[serde(rename = "CallbackURL", alias = "callback_url", default)]
    callback_url: String,
    #[serde(rename = "UrlMethod", alias = "url_method", alias = "method", default)]
    method: String,
    #[serde(rename = "Body", alias = "body", default)]
    body: String,
}

/// Flatten a `{number: [rule, ...]}` listing.
fn flatten_listing(listing: HashMap<String, Vec<ListedRule>>) -> Vec<WebhookRule> {
    listing
        .into_iter()
        .flat_map(|(number, rules)| {
            rules.into_iter().map(move |r| WebhookRule {
                phrase: r.phrase,
                callback_url: r.callback_url,
                method: if r.method.is_empty() {
                    DEFAULT_WEBHOOK_METHOD.to_string()
                } else {
                    r.method
                },
                body: r.body,
                number: number.clone(),
            })
        })
        .collect()
}

/// Webhook API of a device runtime.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Rules currently registered on the runtime.
    async fn list_webhooks(&self, device: &ContainerDescriptor) -> Result<Vec<WebhookRule>>;

    /// Register one rule on the runtime.
    async fn register_webhook(&self, device: &ContainerDescriptor, rule: &WebhookRule)
    -> Result<()>;
}

/// [`DeviceApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpDeviceApi {
    /// Per-request timeout for webhook calls.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Create a client with the default timeout.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Override the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn error_text(resp: reqwest::Response) -> String {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        format!("status {}: {}", status.as_u16(), body.trim())
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn list_webhooks(&self, device: &ContainerDescriptor) -> Result<Vec<WebhookRule>> {
        let resp = self
            .client
            .post(device.url_for(LIST_PATH))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| Error::WebhookFetch(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::WebhookFetch(Self::error_text(resp).await));
        }

        let listing: HashMap<String, Vec<ListedRule>> = resp
            .json()
            .await
            .map_err(|e| Error::WebhookFetch(format!("invalid listing: {}", e)))?;
        Ok(flatten_listing(listing))
    }

    async fn register_webhook(
        &self,
        device: &ContainerDescriptor,
        rule: &WebhookRule,
    ) -> Result<()> {
        let push_error = |message: String| Error::WebhookPush {
            phrase: rule.phrase.clone(),
            callback_url: rule.callback_url.clone(),
            message,
        };

        let resp = self
            .client
            .post(device.url_for(REGISTER_PATH))
            .timeout(self.timeout)
            .json(&RegisterWebhookPayload::from(rule))
            .send()
            .await
            .map_err(|e| push_error(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(push_error(Self::error_text(resp).await));
        }
        Ok(())
    }
}

/// What a reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Rules registered on the runtime.
    pub pushed: usize,
    /// Desired rules already present (or repeated in the input).
    pub skipped: usize,
}

/// Pushes desired rules missing from a device runtime.
pub struct WebhookReconciler {
    api: Arc<dyn DeviceApi>,
}

impl WebhookReconciler {
    /// Create a reconciler over a device API.
    pub fn new(api: Arc<dyn DeviceApi>) -> Self {
        Self { api }
    }

    /// The device API used for pushes.
    pub fn api(&self) -> &Arc<dyn DeviceApi> {
        &self.api
    }

    /// Make every desired rule present on the runtime.
    ///
    /// Fails without pushing anything if the current rules cannot be listed.
    /// Stops at the first failed push; the error names the rule.
    pub async fn reconcile(
        &self,
        device: &ContainerDescriptor,
        desired: &[WebhookRule],
    ) -> Result<ReconcileReport> {
        let existing = self.api.list_webhooks(device).await.inspect_err(|e| {
            warn!(container_id = %device.id, error = %e, "Could not list device webhooks");
        })?;

        let mut present: HashSet<WebhookKey> = existing.iter().map(WebhookRule::key).collect();
        let mut report = ReconcileReport::default();

        for rule in desired {
            // insert() also de-duplicates repeats within this pass.
            if !present.insert(rule.key()) {
                report.skipped += 1;
                continue;
            }
            self.api.register_webhook(device, rule).await?;
            debug!(
                container_id = %device.id,
                phrase = %rule.phrase,
                callback_url = %rule.callback_url,
                "Registered webhook"
            );
            report.pushed += 1;
        }

        if report.pushed > 0 {
            info!(
                container_id = %device.id,
                pushed = report.pushed,
                skipped = report.skipped,
                "Webhooks reconciled"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_defaults_method_to_post() {
        let payload: RegisterWebhookPayload = serde_json::from_str(
            r#"{"number":"5511","phrase":"oi","callback_url":"http://cb.local/hook"}"#,
        )
        .unwrap();
        let rule = payload.into_rule().unwrap();
        assert_eq!(rule.method, "POST");
        assert_eq!(rule.body, "");
    }

    #[test]
    fn test_payload_keeps_method_as_sent() {
        let payload = RegisterWebhookPayload {
            callback_url: "http://cb.local/hook".into(),
            url_method: "get".into(),
            ..Default::default()
        };
        let rule = payload.into_rule().unwrap();
        assert_eq!(rule.method, "get");
        assert_ne!(rule.key(), WebhookRule { method: "GET".into(), ..rule.clone() }.key());
    }

    #[test]
    fn test_payload_requires_callback() {
        let payload = RegisterWebhookPayload {
            phrase: "oi".into(),
            ..Default::default()
        };
        assert!(matches!(payload.into_rule(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_key_ignores_body() {
        let a = WebhookRule {
            phrase: "oi".into(),
            callback_url: "http://cb".into(),
            method: "POST".into(),
            body: "one".into(),
            number: "5511".into(),
        };
        let b = WebhookRule {
            body: "two".into(),
            ..a.clone()
        };
        assert_eq!(a.key(), b.key());
        let c = WebhookRule {
            method: "GET".into(),
            ..a.clone()
        };
        assert_ne!(a.key(), c.key());
    }

    #[test]
    fn test_flatten_listing_accepts_capitalized_keys() {
        let listing: HashMap<String, Vec<ListedRule>> = serde_json::from_str(
            r#"{"5511":[{"Phrase":"oi","CallbackURL":"http://cb","UrlMethod":"GET","Body":"{}"}]}"#,
        )
        .unwrap();
        let rules = flatten_listing(listing);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].number, "5511");
        assert_eq!(rules[0].method, "GET");
        assert_eq!(rules[0].callback_url, "http://cb");
    }
}
