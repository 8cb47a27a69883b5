//! Store keys and topics owned by one run.

/// Every key and topic a run touches.
///
/// ```
/// use runvisor::RunKeys;
///
/// let keys = RunKeys::new("r1", "worker-a");
/// assert_eq!(keys.log, "agent_run:r1:responses");
/// assert_eq!(keys.notify, "agent_run:r1:new_response");
/// assert_eq!(keys.instance_control, "agent_run:r1:control:worker-a");
/// assert_eq!(keys.global_control, "agent_run:r1:control");
/// assert_eq!(keys.marker, "active_run:worker-a:r1");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunKeys {
    /// Append log (ordered list of serialized events).
    pub log: String,
    /// "New data" notification channel.
    pub notify: String,
    /// Control topic scoped to the worker instance running this run.
    pub instance_control: String,
    /// Control topic shared by every observer of the run.
    pub global_control: String,
    /// Liveness marker with a TTL.
    pub marker: String,
}

impl RunKeys {
    pub fn new(run_id: &str, instance_id: &str) -> Self {
        Self {
            log: format!("agent_run:{run_id}:responses"),
            notify: format!("agent_run:{run_id}:new_response"),
            instance_control: format!("agent_run:{run_id}:control:{instance_id}"),
            global_control: format!("agent_run:{run_id}:control"),
            marker: format!("active_run:{instance_id}:{run_id}"),
        }
    }

    /// Both control topics, instance-scoped first.
    pub fn control_topics(&self) -> Vec<String> {
        vec![self.instance_control.clone(), self.global_control.clone()]
    }
}
