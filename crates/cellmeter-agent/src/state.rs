//! Shared agent state accessible from all tasks and request handlers.

use std::sync::Arc;

use cellmeter_common::config::AgentConfig;

use crate::modem::ModemSession;
use crate::sensors::SensorReader;
use crate::session::SessionStore;
use crate::shell::RemoteShell;
use crate::sink::MetricsSink;
use crate::tasks::TaskOrchestrator;

pub struct AgentState {
    pub config: AgentConfig,
    /// Device identity (hostname) tagged onto every measurement.
    pub device_id: String,
    pub sessions: Arc<SessionStore>,
    pub tasks: TaskOrchestrator,
    pub modem: Arc<ModemSession>,
    pub shell: Arc<RemoteShell>,
    pub sink: Arc<dyn MetricsSink>,
    pub sensors: Option<Arc<dyn SensorReader>>,
}

impl AgentState {
    pub fn new(
        config: AgentConfig,
        device_id: String,
        sink: Arc<dyn MetricsSink>,
        sensors: Option<Arc<dyn SensorReader>>,
    ) -> anyhow::Result<Self> {
        let modem = Arc::new(ModemSession::new(&config.router)?);
        let shell = Arc::new(RemoteShell::new(&config.router));
        let sessions = Arc::new(SessionStore::with_state_file(config.state_file()));
        Ok(AgentState {
            config,
            device_id,
            sessions,
            tasks: TaskOrchestrator::new(),
            modem,
            shell,
            sink,
            sensors,
        })
    }
}
