//! Probe engine backed by the worker's read-only query path.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{ProbeEngine, ProbeError, ProbeQuery, ProbeResult, ProbeVerdict};
use crate::config::Driver;
use crate::worker::{EngineConnection, WorkerClient, WorkerError};

pub struct WorkerProbeEngine {
    client: Arc<WorkerClient>,
    connection: EngineConnection,
}

impl WorkerProbeEngine {
    pub fn new(client: Arc<WorkerClient>, connection: EngineConnection) -> Self {
        Self { client, connection }
    }
}

#[async_trait]
impl ProbeEngine for WorkerProbeEngine {
    fn driver(&self) -> Driver {
        self.connection.driver
    }

    async fn probe(&self, query: &ProbeQuery) -> ProbeResult<ProbeVerdict> {
        if query.driver() != self.connection.driver {
            return Err(ProbeError::Unsafe(format!(
                "probe built for {} sent to {}",
                query.driver().as_str(),
                self.connection.driver.as_str()
            )));
        }

        debug!(sql = query.sql(), "submitting zero-row probe");
        match self
            .client
            .execute_read_only(&self.connection, query.sql(), &[])
            .await
        {
            Ok(rows) => {
                let touched = rows.touched();
                if touched > 0 {
                    return Err(ProbeError::RowsTouched(touched));
                }
                Ok(ProbeVerdict::Accepted)
            }
            Err(WorkerError::Rejected(message)) => Ok(ProbeVerdict::Rejected { message }),
            Err(e) => Err(e.into()),
        }
    }
}
