//! Twilio REST client for Programmable Voice

use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, TwilioError};

/// Call resource returned by the Calls API
#[derive(Debug, Clone, Deserialize)]
pub struct CallResource {
    pub sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Twilio API client
#[derive(Debug, Clone)]
pub struct TwilioClient {
    client: Client,
    account_sid: String,
    auth_token: String,
    base_url: String,
}

/// How Twilio learns what to do once an outbound call connects
pub enum CallInstructions<'a> {
    /// Fetch TwiML from this URL
    Url(&'a str),
    /// Use this TwiML document directly
    Twiml(&'a str),
}

impl TwilioClient {
    pub fn new(account_sid: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            base_url: "https://api.twilio.com".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls.json",
            self.base_url, self.account_sid
        )
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.base_url, self.account_sid, call_sid
        )
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<CallResource> {
        let response = self
            .client
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(TwilioError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }

    /// Place an outbound call
    pub async fn create_call(
        &self,
        from: &str,
        to: &str,
        instructions: CallInstructions<'_>,
        status_callback: &str,
    ) -> Result<CallResource> {
        info!("Placing call to {}", to);

        let mut form = vec![
            ("To", to.to_string()),
            ("From", from.to_string()),
            ("StatusCallback", status_callback.to_string()),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        for event in ["initiated", "ringing", "answered", "completed"] {
            form.push(("StatusCallbackEvent", event.to_string()));
        }
        match instructions {
            CallInstructions::Url(url) => {
                form.push(("Url", url.to_string()));
                form.push(("Method", "POST".to_string()));
            }
            CallInstructions::Twiml(twiml) => form.push(("Twiml", twiml.to_string())),
        }

        let call = self.post_form(&self.calls_url(), &form).await?;
        debug!("Created call {} ({:?})", call.sid, call.status);
        Ok(call)
    }

    /// Replace the TwiML a live call is executing
    pub async fn update_call_twiml(&self, call_sid: &str, twiml: &str) -> Result<CallResource> {
        debug!("Updating TwiML for call {}", call_sid);
        self.post_form(&self.call_url(call_sid), &[("Twiml", twiml.to_string())])
            .await
    }

    /// End a call
    pub async fn complete_call(&self, call_sid: &str) -> Result<CallResource> {
        info!("Hanging up call {}", call_sid);
        self.post_form(
            &self.call_url(call_sid),
            &[("Status", "completed".to_string())],
        )
        .await
    }
}
