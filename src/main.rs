use std::sync::Arc;

use anyhow::{Context, Error};
use clap::Parser;
use hyper::Uri;

use voice_bot_relay::{
    app::App,
    assistant::GeminiAssistant,
    config::Config,
    http_util::client::HttpClient,
    knowledge_base::KnowledgeBaseClient,
    openai::provider::OpenAiProvider,
    serve,
    store::RecordStore,
};

#[tokio::main]
async fn main() {
    // Loaded before parsing so `.env` values count as environment.
    let dotenv = dotenvy::dotenv();
    env_logger::builder().init();
    if let Err(e) = dotenv {
        log::warn!("Cannot load .env file: {e}");
    }
    let config = Config::parse();

    if let Err(e) = run(config).await {
        log::error!("Error running server: {e:#}");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<(), Error> {
    let proxy = config
        .http_proxy
        .as_deref()
        .map(str::parse::<Uri>)
        .transpose()
        .context("Cannot parse proxy URL")?;
    let client = HttpClient::new(proxy.as_ref())?;

    if config.openai_api_key.is_none() {
        log::warn!("OPENAI_API_KEY is not set, provider calls go out unauthenticated");
    }
    if config.eleven_api_key.is_none() {
        log::warn!("ELEVEN_API_KEY is not set. API calls will fail until it is configured.");
    }
    if config.webhook_secret.is_none() {
        log::warn!("ELEVENLABS_WEBHOOK_SECRET is not set, signed webhooks will be refused");
    }

    let store = match &config.data_file {
        Some(path) => RecordStore::open(path)
            .await
            .with_context(|| format!("Cannot open data file {path}"))?,
        None => RecordStore::in_memory(),
    };

    let provider = OpenAiProvider::new(client.clone(), &config.openai_base_url)
        .api_key(config.openai_api_key.clone());
    let assistant = GeminiAssistant::new(client.clone(), &config.gemini_base_url)
        .api_key(config.google_api_key.clone())
        .model(config.gemini_model.clone());
    if !assistant.is_configured() {
        log::warn!("Gemini assistant is not configured, /api/chat will fail");
    }
    let knowledge_base = KnowledgeBaseClient::new(client, &config.eleven_base_url)
        .api_key(config.eleven_api_key.clone());

    log::info!("Chat completions strategy: {:?}", config.strategy);
    let router = App::new(provider, assistant, Arc::new(store), knowledge_base)
        .strategy(config.strategy)
        .stream_delay(config.stream_delay())
        .webhook_secret(config.webhook_secret.clone())
        .router();

    serve(config.addr, router).await
}
