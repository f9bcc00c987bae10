//! vc-twilio: Twilio Programmable Voice adapter for the voice call gateway
//!
//! Translates Twilio status/gather webhooks into normalized call events,
//! verifies `X-Twilio-Signature`, and drives calls through the Twilio REST
//! API. Speech is played over a media stream when one is attached, and
//! through TwiML `<Say>` otherwise.

pub mod client;
pub mod error;
pub mod provider;
pub mod signature;
pub mod twiml;
pub mod webhook;

pub use client::{CallInstructions, CallResource, TwilioClient};
pub use error::{Result, TwilioError};
pub use provider::{TwilioProvider, TwilioProviderConfig};
