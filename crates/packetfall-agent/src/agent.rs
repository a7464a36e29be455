//! Top-level agent: hub resolution, capture thread and the reconnect loop.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use tokio::sync::watch;

use crate::backoff::Backoff;
use crate::capture::{CaptureError, PacketSource, spawn_capture};
use crate::client::{self, Identity, SessionEnd};
use crate::config::{AgentConfig, fallback_hub_url};
use crate::discovery;
use crate::pipeline::Pipeline;

/// Why [`Agent::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Shutdown,
    ReconnectExhausted { attempts: u32 },
}

pub struct Agent {
    config: AgentConfig,
    pipeline: Arc<Pipeline>,
    backoff: Backoff,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let pipeline = Arc::new(Pipeline::new(&config.pipeline));
        let backoff = Backoff::from_config(&config.reconnect);
        Self {
            config,
            pipeline,
            backoff,
        }
    }

    /// Replace the reconnect schedule.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        Arc::clone(&self.pipeline)
    }

    pub fn identity(&self) -> Identity {
        Identity {
            source_id: self.config.source_id.clone(),
            source_name: self.config.source_name.clone(),
        }
    }

    /// Feed `source` into the pipeline from a dedicated thread.
    pub fn start_capture<S: PacketSource>(&self, source: S) -> Result<JoinHandle<()>, CaptureError> {
        let pipeline = Arc::clone(&self.pipeline);
        spawn_capture(source, move |raw| {
            let _ = pipeline.ingest(&raw, Instant::now());
        })
    }

    /// Configured hub, else a discovered one, else the local default.
    pub async fn resolve_hub_url(&self) -> String {
        if let Some(url) = &self.config.hub_url {
            return url.clone();
        }
        if self.config.should_discover()
            && let Some(announce) = discovery::discover_hub(&self.config.discovery).await
        {
            let url = discovery::hub_url(&announce);
            tracing::info!(url = %url, "Using discovered hub");
            return url;
        }
        let url = fallback_hub_url();
        tracing::info!(url = %url, "Using default hub");
        url
    }

    /// Connect, stream batches, and reconnect with backoff until shutdown or
    /// the attempt budget runs out.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Outcome {
        let url = self.resolve_hub_url().await;
        let identity = self.identity();

        loop {
            match client::connect(&url, &identity).await {
                Ok(ws) => {
                    self.backoff.reset();
                    tracing::info!(
                        url = %url,
                        source_id = %identity.source_id,
                        source_name = %identity.source_name,
                        "Connected to hub"
                    );
                    let end = client::run_session(
                        ws,
                        &identity,
                        &self.pipeline,
                        &self.config.pipeline,
                        &mut shutdown,
                    )
                    .await;
                    if end == SessionEnd::Shutdown {
                        return Outcome::Shutdown;
                    }
                    tracing::warn!(url = %url, "Connection to hub lost");
                },
                Err(e) => tracing::warn!(url = %url, error = %e, "Connection failed"),
            }

            let Some(delay) = self.backoff.next_delay() else {
                let attempts = self.backoff.attempt();
                tracing::warn!(attempts, "Max reconnection attempts reached");
                return Outcome::ReconnectExhausted { attempts };
            };
            tracing::info!(
                attempt = self.backoff.attempt(),
                max = self.backoff.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );
            if !client::sleep_or_shutdown(delay, &mut shutdown).await {
                return Outcome::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn explicit_hub_skips_discovery() {
        let mut config = AgentConfig::default();
        config.hub_url = Some("ws://10.9.9.9:1234".into());
        let agent = Agent::new(config);
        assert_eq!(agent.resolve_hub_url().await, "ws://10.9.9.9:1234");
    }

    #[tokio::test]
    async fn no_discover_uses_fallback() {
        let mut config = AgentConfig::default();
        config.discover = false;
        let agent = Agent::new(config);
        assert_eq!(agent.resolve_hub_url().await, fallback_hub_url());
    }

    #[tokio::test]
    async fn unreachable_hub_exhausts_attempts() {
        // Reserve a port, then free it so nothing listens there.
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut config = AgentConfig::default();
        config.hub_url = Some(format!("ws://127.0.0.1:{port}"));
        let agent = Agent::new(config).with_backoff(Backoff::scaled(
            3,
            Duration::from_millis(5),
            Duration::from_millis(50),
        ));

        let (_tx, rx) = watch::channel(false);
        let outcome = tokio::time::timeout(Duration::from_secs(5), agent.run(rx))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ReconnectExhausted { attempts: 3 });
    }

    #[tokio::test]
    async fn shutdown_interrupts_backoff() {
        let port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let mut config = AgentConfig::default();
        config.hub_url = Some(format!("ws://127.0.0.1:{port}"));
        let agent = Agent::new(config);

        let (tx, rx) = watch::channel(false);
        let task = tokio::spawn(agent.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send(true).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Outcome::Shutdown);
    }
}
