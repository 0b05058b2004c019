use std::time::Duration;

use clap::Parser;

use crate::openai::completions::Strategy;

/// Startup configuration. Every option can also be given through the environment.
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address to listen for client connections
    #[arg(short, long, env = "ADDR", default_value = "0.0.0.0:3000")]
    pub addr: String,

    /// Base URL of the OpenAI-compatible provider
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    pub openai_base_url: String,
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    /// How chat completions are produced
    #[arg(long, env = "CHAT_STRATEGY", value_enum, default_value_t)]
    pub strategy: Strategy,
    /// Pause between emulated stream frames, in milliseconds
    #[arg(long, env = "STREAM_DELAY_MS", default_value_t = 10)]
    pub stream_delay_ms: u64,

    #[arg(long, env = "GOOGLE_API_KEY", hide_env_values = true)]
    pub google_api_key: Option<String>,
    /// Gemini model answering the car assistant prompts
    #[arg(long, env = "GIMNI_MODAL_NAME")]
    pub gemini_model: Option<String>,
    #[arg(
        long,
        env = "GEMINI_BASE_URL",
        default_value = "https://generativelanguage.googleapis.com/v1beta"
    )]
    pub gemini_base_url: String,

    #[arg(long, env = "ELEVEN_API_KEY", hide_env_values = true)]
    pub eleven_api_key: Option<String>,
    /// Base URL of the voice platform API
    #[arg(long, env = "ELEVEN_API_BASE_URL", default_value = "https://api.elevenlabs.io")]
    pub eleven_base_url: String,
    /// Shared secret for webhook signatures
    #[arg(long, env = "ELEVENLABS_WEBHOOK_SECRET", hide_env_values = true)]
    pub webhook_secret: Option<String>,

    /// Keep audit records in this JSON-lines file instead of memory only
    #[arg(long, env = "DATA_FILE")]
    pub data_file: Option<String>,
    /// HTTP proxy to tunnel outbound requests through
    #[arg(long, env = "HTTPS_PROXY")]
    pub http_proxy: Option<String>,
}

impl Config {
    pub fn stream_delay(&self) -> Duration {
        Duration::from_millis(self.stream_delay_ms)
    }
}
