//! CLI command implementations

pub mod auth;
pub mod generate;
pub mod nodes;
pub mod pipeline;
pub mod status;

use anyhow::{bail, Context, Result};
use mpx_client::{Backend, HttpClient, MockClient, MpxConfig, RemoteClient, StatusPoller};
use mpx_nodes::{LogProgress, NodeContext};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// The backend connection and node context shared by a command
pub struct Session {
    pub ctx: NodeContext,
    client: Arc<dyn RemoteClient>,
}

impl Session {
    pub fn open(
        config: &MpxConfig,
        mock: bool,
        output_dir: Option<PathBuf>,
        workers: Option<usize>,
    ) -> Result<Self> {
        let (client, backend): (Arc<dyn RemoteClient>, Backend) = if mock {
            tracing::info!("using the offline mock backend");
            let client: Arc<dyn RemoteClient> = Arc::new(MockClient::canned());
            let backend = Backend::new(client.clone())
                .with_poller(StatusPoller::new(Duration::from_millis(10)));
            (client, backend)
        } else {
            let client: Arc<dyn RemoteClient> =
                Arc::new(HttpClient::from_config(config).context("Failed to create client")?);
            let backend = Backend::from_config(client.clone(), config)?;
            (client, backend)
        };

        let mut ctx = NodeContext::from_config(backend, config)
            .with_progress(Arc::new(LogProgress::new("mpx")));
        if let Some(dir) = output_dir {
            ctx = ctx.with_output_dir(dir);
        }
        match workers {
            Some(0) => bail!("--workers must be at least 1"),
            Some(n) => ctx = ctx.with_workers(n),
            None => {}
        }

        Ok(Self { ctx, client })
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    /// The output directory, created if missing
    pub fn output_dir(&self) -> Result<PathBuf> {
        Ok(self.ctx.resolve_output_dir(None)?)
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
