// HTTP client for the external replication service.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use stagehand_common::replication::{ContextDescriptor, ReplicationTask};
use tokio::runtime::Handle;
use tracing::debug;
use url::Url;

use super::{ReplicationFault, ReplicationResponse, Replicator};

const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Debug, Serialize)]
struct ReplicationRequest<'a> {
    source: &'a ContextDescriptor,
    target: &'a ContextDescriptor,
    task: &'a ReplicationTask,
}

/// Posts replication requests to a remote service and reads back its
/// replication log.
///
/// `replicate` blocks the calling thread on `runtime`; call it from a
/// blocking worker, never from inside an async task.
pub struct HttpReplicator {
    client: reqwest::Client,
    endpoint: Url,
    runtime: Handle,
}

impl HttpReplicator {
    pub fn new(endpoint: Url, timeout: Duration, runtime: Handle) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build replication HTTP client")?;
        Ok(Self { client, endpoint, runtime })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(
        &self,
        request: &ReplicationRequest<'_>,
    ) -> Result<ReplicationResponse, ReplicationFault> {
        let endpoint = self.endpoint.to_string();
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|error| ReplicationFault::Transport {
                endpoint: endpoint.clone(),
                message: error.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| ReplicationFault::Transport {
            endpoint: endpoint.clone(),
            message: error.to_string(),
        })?;

        if !status.is_success() {
            return Err(ReplicationFault::Rejected {
                endpoint,
                status: status.as_u16(),
                message: truncate(&body),
            });
        }
        parse_body(&endpoint, &body)
    }
}

impl Replicator for HttpReplicator {
    fn replicate(
        &self,
        source: &ContextDescriptor,
        target: &ContextDescriptor,
        task: &ReplicationTask,
    ) -> Result<ReplicationResponse, ReplicationFault> {
        debug!(endpoint = %self.endpoint, source = %source, target = %target, "posting replication");
        let request = ReplicationRequest { source, target, task };
        self.runtime.block_on(self.send(&request))
    }
}

fn parse_body(endpoint: &str, body: &str) -> Result<ReplicationResponse, ReplicationFault> {
    if body.trim().is_empty() {
        return Ok(ReplicationResponse::Empty);
    }
    let value: Value = serde_json::from_str(body).map_err(|error| ReplicationFault::Decode {
        endpoint: endpoint.to_string(),
        message: error.to_string(),
    })?;
    Ok(ReplicationResponse::from_value(value))
}

fn truncate(body: &str) -> String {
    if body.chars().count() <= MAX_ERROR_BODY_CHARS {
        return body.to_string();
    }
    let mut cut: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    cut.push('…');
    cut
}
