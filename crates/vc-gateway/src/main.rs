//! vc-gateway: Voice Call Gateway Main Binary
//!
//! Usage:
//!   vc-gateway                   - Start the gateway
//!   vc-gateway --config <path>   - Start with an explicit config file
//!   vc-gateway --help            - Show help

mod error;
mod events;
mod server;
mod stream;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use vc_core::{
    CallManager, CallRegistry, CallStore, ManagerSettings, MockProvider, ProviderAdapter,
    ProviderKind, SqliteCallStore, ToolManager, VoiceCallConfig,
};
use vc_media::{MediaStreamBridge, OpenAiRealtimeStt, OpenAiTts, RealtimeStt, SttConfig, TtsConfig};
use vc_tools::register_call_tools;
use vc_twilio::{TwilioProvider, TwilioProviderConfig};

use crate::server::AppState;

/// Run mode
#[derive(Debug, PartialEq)]
enum RunMode {
    Serve { config_path: Option<String> },
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = match parse_args(std::env::args().skip(1))? {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("vc-gateway {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Serve { config_path } => config_path,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    dotenvy::dotenv().ok();

    let config = match &config_path {
        Some(path) => VoiceCallConfig::from_toml_file(path),
        None => VoiceCallConfig::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    tracing::info!("Starting vc-gateway...");
    tracing::info!("Provider: {:?}", config.provider);

    run(config).await
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<RunMode> {
    let mut args = args.into_iter();
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            "--config" | "-c" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--config requires a path"))?;
                config_path = Some(path);
            }
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(RunMode::Serve { config_path })
}

fn print_help() {
    println!("vc-gateway - Voice Call Gateway");
    println!();
    println!("Usage:");
    println!("  vc-gateway                  Start the gateway");
    println!("  vc-gateway --config <path>  Load configuration from <path>");
    println!("  vc-gateway --help           Show this help message");
    println!("  vc-gateway --version        Show version");
    println!();
    println!("Without --config, voice-call.toml in the working directory is used if present.");
    println!();
    println!("Environment Variables:");
    println!("  VOICE_CALL_PROVIDER          mock or twilio (default: mock)");
    println!("  VOICE_CALL_FROM_NUMBER       Caller id for outbound calls (required)");
    println!("  VOICE_CALL_INBOUND_POLICY    disabled, open, allowlist or pairing");
    println!("  VOICE_CALL_ALLOW_FROM        Comma-separated allowlist");
    println!("  VOICE_CALL_MAX_DURATION_SECS Hard call length limit (default: 300)");
    println!("  VOICE_CALL_PUBLIC_URL        Public base URL for webhooks and streams");
    println!("  VOICE_CALL_PORT              HTTP port (default: 3334)");
    println!("  VOICE_CALL_STORE_PATH        SQLite call store (default: data/voice-calls.db)");
    println!("  TWILIO_ACCOUNT_SID           Twilio account sid");
    println!("  TWILIO_AUTH_TOKEN            Twilio auth token");
    println!("  OPENAI_API_KEY               Speech recognition and synthesis");
    println!("  RUST_LOG                     Log filter (default: info)");
}

async fn run(config: VoiceCallConfig) -> anyhow::Result<()> {
    let store: Arc<dyn CallStore> = Arc::new(
        SqliteCallStore::new(&config.store.path)
            .map_err(|e| anyhow::anyhow!("Failed to open call store: {}", e))?,
    );

    let bridge = if config.streaming.enabled {
        Some(build_bridge(&config)?)
    } else {
        tracing::info!("Media streaming disabled");
        None
    };

    let provider: Arc<dyn ProviderAdapter> = match config.provider {
        ProviderKind::Mock => {
            tracing::warn!("Using the mock provider; no real calls will be placed");
            Arc::new(MockProvider::new())
        }
        ProviderKind::Twilio => {
            let twilio = TwilioProvider::new(TwilioProviderConfig::from_config(&config)?)?;
            if let Some((bridge, _)) = &bridge {
                twilio.set_speech_output(bridge.clone());
            }
            Arc::new(twilio)
        }
    };

    let manager = CallManager::new(
        ManagerSettings::from_config(&config),
        CallRegistry::new(),
        provider.clone(),
        store,
    );
    let restored = manager.restore().await?;
    tracing::info!("Call manager ready ({} calls restored)", restored);

    let mut tools = ToolManager::new();
    register_call_tools(&mut tools, manager.clone(), config.to_number.clone());
    tracing::info!(
        "Registered {} tools: {:?}",
        tools.len(),
        tools.tool_names()
    );

    let bridge = bridge.map(|(bridge, events)| {
        tokio::spawn(events::run(manager.clone(), events));
        bridge
    });

    let state = AppState {
        manager: manager.clone(),
        provider,
        bridge: bridge.clone(),
        tools: Arc::new(tools),
        webhook_url: config.webhook_url(),
    };

    tracing::info!("Webhook URL: {}", config.webhook_url());
    if bridge.is_some() {
        tracing::info!("Media stream URL: {}", config.stream_url());
    }
    tracing::info!("Press Ctrl+C to exit");

    server::serve(state, &config.serve, shutdown_signal()).await?;

    tracing::info!("Shutting down...");
    if let Some(bridge) = &bridge {
        bridge.shutdown();
    }
    let drained = manager.drain().await;
    if !drained.is_empty() {
        tracing::info!(
            "{} active calls left in the store for the next start",
            drained.len()
        );
    }

    tracing::info!("vc-gateway stopped");
    Ok(())
}

fn build_bridge(
    config: &VoiceCallConfig,
) -> anyhow::Result<(
    Arc<MediaStreamBridge>,
    tokio::sync::mpsc::UnboundedReceiver<vc_media::BridgeEvent>,
)> {
    let api_key = config
        .streaming
        .openai_api_key
        .clone()
        .ok_or_else(|| anyhow::anyhow!("streaming.openai_api_key is required"))?;

    let mut tts_config = TtsConfig::openai(&api_key)
        .with_model(&config.tts.model)
        .with_voice(&config.tts.voice);
    if let Some(instructions) = &config.tts.instructions {
        tts_config = tts_config.with_instructions(instructions);
    }
    let tts = Arc::new(OpenAiTts::new(tts_config)?);

    let stt_config = SttConfig::openai(&api_key)
        .with_model(&config.streaming.stt_model)
        .with_silence_duration_ms(config.streaming.silence_duration_ms)
        .with_vad_threshold(config.streaming.vad_threshold);
    let stt: Arc<dyn RealtimeStt> = Arc::new(OpenAiRealtimeStt::new(stt_config));

    let (bridge, events) = MediaStreamBridge::new(tts, Some(stt));
    tracing::info!("Media streaming enabled (tts: {}, stt: {})", config.tts.model, config.streaming.stt_model);
    Ok((Arc::new(bridge), events))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_args_default_serve() {
        assert_eq!(
            parse_args(args(&[])).unwrap(),
            RunMode::Serve { config_path: None }
        );
    }

    #[test]
    fn test_parse_args_config_path() {
        assert_eq!(
            parse_args(args(&["--config", "voice.toml"])).unwrap(),
            RunMode::Serve {
                config_path: Some("voice.toml".to_string())
            }
        );
        assert!(parse_args(args(&["-c"])).is_err());
    }

    #[test]
    fn test_parse_args_flags() {
        assert_eq!(parse_args(args(&["--help"])).unwrap(), RunMode::Help);
        assert_eq!(parse_args(args(&["-v"])).unwrap(), RunMode::Version);
        assert!(parse_args(args(&["--bogus"])).is_err());
    }
}
