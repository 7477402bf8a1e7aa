//! Configuration parsing and validation for the gateway binary.
//!
//! This module handles command-line argument parsing and validation using
//! clap. The model identifier is deliberately absent here: it is re-read
//! from the environment on every request, so a missing model is a service
//! condition rather than a startup failure.
use anyhow::anyhow;
use clap::Parser;
use url::Url;

#[derive(Debug, Clone, Parser)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// The port on which the gateway will listen.
    #[arg(short = 'p', long, default_value_t = 3000)]
    pub port: u16,

    /// The port on which the metrics server will listen.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// Whether to enable the metrics endpoint.
    #[arg(short = 'm', long, default_value_t = true)]
    pub metrics: bool,

    /// The prefix to use for metrics.
    #[arg(long, default_value = "nirvana")]
    pub metrics_prefix: String,

    /// Base URL of the Ollama instance.
    #[arg(long, env = "OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: Url,

    /// Maximum number of idle connections kept alive to the backend.
    #[arg(long, default_value_t = 100)]
    pub pool_max_idle_per_host: usize,

    /// How long (in seconds) to keep idle backend connections alive.
    #[arg(long, default_value_t = 90)]
    pub pool_idle_timeout_secs: u64,
}

impl Config {
    pub fn validate(self) -> Result<Self, anyhow::Error> {
        if self.ollama_url.cannot_be_a_base() {
            return Err(anyhow!(
                "Ollama URL '{}' cannot be used as a base URL",
                self.ollama_url
            ));
        }
        Ok(self)
    }
}
