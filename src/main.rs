//! `keyrelay` command line
//!
//! Streams one completion to stdout through the credential pool.

use anyhow::Context;
use clap::Parser;
use futures::StreamExt;
use keyrelay::{ConfigLoader, Message, RelayRequest, StreamRelay};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::error;
use tracing_subscriber::EnvFilter;

/// Stream one chat completion through the credential pool
#[derive(Parser, Debug)]
#[command(name = "keyrelay", about, version)]
struct Args {
    /// Config file (default: KEYRELAY_CONFIG, then the standard search paths)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Model to request; also picks the credential tier
    #[arg(long, default_value = "gpt-3.5-turbo")]
    model: String,

    /// System prompt sent ahead of the user message
    #[arg(long)]
    system: Option<String>,

    #[arg(long)]
    temperature: Option<f32>,

    /// Prompt text; multiple words are joined with spaces
    #[arg(required = true)]
    prompt: Vec<String>,
}

impl Args {
    fn request(&self) -> RelayRequest {
        let mut request =
            RelayRequest::new(self.model.clone(), vec![Message::user(self.prompt.join(" "))]);
        if let Some(system) = &self.system {
            request = request.with_system_prompt(system.clone());
        }
        if let Some(temperature) = self.temperature {
            request = request.with_temperature(temperature);
        }
        request
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load .env file if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyrelay=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let loader = match &args.config {
        Some(path) => ConfigLoader::from_path(path)?,
        None => ConfigLoader::new()?,
    };
    let relay = StreamRelay::from_config(loader.config()).context("failed to set up relay")?;

    let mut stream = match relay.relay(&args.request(), None).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(status = e.status_hint(), error = %e, "relay failed");
            return Err(e.into());
        }
    };

    let mut stdout = tokio::io::stdout();
    while let Some(segment) = stream.next().await {
        let segment = segment.context("completion stream failed")?;
        stdout.write_all(&segment).await?;
        stdout.flush().await?;
    }
    stdout.write_all(b"\n").await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "keyrelay",
            "--model",
            "gpt-4",
            "--system",
            "Be brief",
            "--temperature",
            "0.3",
            "Tell",
            "me",
            "a joke",
        ])
        .unwrap();
        let request = args.request();

        assert!(args.config.is_none());
        assert_eq!(request.model, "gpt-4");
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief"));
        assert_eq!(request.temperature, Some(0.3));
        assert_eq!(request.messages, vec![Message::user("Tell me a joke")]);
    }

    #[test]
    fn test_parse_args_defaults() {
        let args = Args::try_parse_from(["keyrelay", "--config", "relay.json", "hi"]).unwrap();
        let request = args.request();

        assert_eq!(args.config, Some(PathBuf::from("relay.json")));
        assert_eq!(request.model, "gpt-3.5-turbo");
        assert!(request.system_prompt.is_none());
        assert!(request.temperature.is_none());
    }

    #[test]
    fn test_parse_args_rejects_bad_input() {
        assert!(Args::try_parse_from(["keyrelay", "--model", "gpt-4"]).is_err());
        assert!(Args::try_parse_from(["keyrelay", "--temperature", "warm", "hi"]).is_err());
        assert!(Args::try_parse_from(["keyrelay", "hi", "--config"]).is_err());
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
