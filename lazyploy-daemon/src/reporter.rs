//! Heartbeat to the status service.
//!
//! `PATCH <url>api/servers?address=<address>` with the status body updates
//! this machine's record. A `200` answer carrying an empty array means no
//! record matched, so the same body is `POST`ed to `<url>api/servers`.
//! Every failure is logged and dropped.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body sent on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub hostname: String,
    pub address: String,
    pub project: String,
    pub platform: String,
    /// `-1` when nothing is installed.
    pub installed_build_id: i64,
    pub state_label: String,
    pub status: String,
}

/// Fire-and-forget status sink. Implementations must swallow their errors.
pub trait StatusReporter: Send + Sync {
    fn report(&self, status: &StatusReport);
}

pub struct HttpStatusReporter {
    agent: ureq::Agent,
    base_url: String,
}

impl HttpStatusReporter {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            base_url: base_url.into(),
        }
    }

    fn servers_url(&self) -> String {
        format!("{}api/servers", self.base_url)
    }

    fn create_record(&self, status: &StatusReport) {
        match self.agent.post(&self.servers_url()).send_json(status) {
            Ok(_) => tracing::info!(address = %status.address, "registered server record"),
            Err(err) => tracing::warn!(error = %err, "creating server record failed"),
        }
    }
}

impl StatusReporter for HttpStatusReporter {
    fn report(&self, status: &StatusReport) {
        let response = self
            .agent
            .request("PATCH", &self.servers_url())
            .query("address", &status.address)
            .send_json(status);
        match response {
            Ok(response) if response.status() == 200 => {
                let no_record = matches!(
                    response.into_json::<Value>(),
                    Ok(Value::Array(records)) if records.is_empty()
                );
                if no_record {
                    self.create_record(status);
                }
            }
            Ok(_) => {}
            Err(err) => tracing::debug!(error = %err, "heartbeat failed"),
        }
    }
}
