use std::time::Duration;

/// How a [`Client`](crate::Client) connects and what it targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// `host:port` of the server.
    pub data_target: String,
    pub project_id: String,
    pub instance_id: String,
    /// Sent with every request that does not name its own profile.
    pub app_profile_id: String,
    /// Applied to calls that do not carry their own deadline. `None` falls
    /// back to [`rowstream_core::call_timeout`].
    pub default_deadline: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            data_target: "127.0.0.1:0".into(),
            project_id: "project".into(),
            instance_id: "instance".into(),
            app_profile_id: String::new(),
            default_deadline: None,
        }
    }
}

impl ClientConfig {
    pub fn with_target(data_target: impl Into<String>) -> Self {
        Self {
            data_target: data_target.into(),
            ..Self::default()
        }
    }

    /// `projects/{project}/instances/{instance}`
    pub fn instance_name(&self) -> String {
        format!("projects/{}/instances/{}", self.project_id, self.instance_id)
    }

    /// `projects/{project}/instances/{instance}/tables/{table}`
    pub fn table_name(&self, table: &str) -> String {
        format!("{}/tables/{table}", self.instance_name())
    }
}

/// Per-call settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Overrides [`ClientConfig::default_deadline`].
    pub deadline: Option<Duration>,
}

impl CallOptions {
    pub fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }
}
