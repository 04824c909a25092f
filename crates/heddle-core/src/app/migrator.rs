//! Migrator - domain / type / stream の登録を冪等に適用する
//!
//! # 順序
//! 1. domains
//! 2. workflow types / activity types
//! 3. streams（Active になるまで待つ）
//! 4. deprecations
//!
//! 既に存在する / 既に deprecate 済み は成功扱い（skipped に数える）。

use std::time::Duration;

use crate::domain::{
    ActivityTypeRegistration, DomainRegistration, StreamRegistration, StreamStatus, TypeRef,
    WorkflowTypeRegistration,
};
use crate::ports::{AdminError, RegistrationClient};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub applied: usize,
    pub skipped: usize,
}

impl MigrationReport {
    fn record(&mut self, result: Result<(), AdminError>) -> Result<(), AdminError> {
        match result {
            Ok(()) => {
                self.applied += 1;
                Ok(())
            }
            Err(e) if e.is_idempotent_repeat() => {
                tracing::debug!(reason = %e, "registration skipped");
                self.skipped += 1;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Migrator {
    domains: Vec<DomainRegistration>,
    workflow_types: Vec<WorkflowTypeRegistration>,
    activity_types: Vec<ActivityTypeRegistration>,
    streams: Vec<StreamRegistration>,
    deprecated_domains: Vec<String>,
    deprecated_workflow_types: Vec<TypeRef>,
    deprecated_activity_types: Vec<TypeRef>,
    stream_poll_interval: Duration,
    stream_poll_attempts: u32,
}

impl Default for Migrator {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            workflow_types: Vec::new(),
            activity_types: Vec::new(),
            streams: Vec::new(),
            deprecated_domains: Vec::new(),
            deprecated_workflow_types: Vec::new(),
            deprecated_activity_types: Vec::new(),
            stream_poll_interval: Duration::from_secs(1),
            stream_poll_attempts: 60,
        }
    }
}

impl Migrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain(mut self, domain: DomainRegistration) -> Self {
        self.domains.push(domain);
        self
    }

    pub fn workflow_type(mut self, workflow: WorkflowTypeRegistration) -> Self {
        self.workflow_types.push(workflow);
        self
    }

    pub fn activity_type(mut self, activity: ActivityTypeRegistration) -> Self {
        self.activity_types.push(activity);
        self
    }

    pub fn stream(mut self, stream: StreamRegistration) -> Self {
        self.streams.push(stream);
        self
    }

    pub fn deprecate_domain(mut self, name: impl Into<String>) -> Self {
        self.deprecated_domains.push(name.into());
        self
    }

    pub fn deprecate_workflow_type(mut self, workflow: TypeRef) -> Self {
        self.deprecated_workflow_types.push(workflow);
        self
    }

    pub fn deprecate_activity_type(mut self, activity: TypeRef) -> Self {
        self.deprecated_activity_types.push(activity);
        self
    }

    /// How often (and how many times) to describe a new stream while it is not yet active.
    pub fn stream_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.stream_poll_interval = interval;
        self.stream_poll_attempts = attempts.max(1);
        self
    }

    pub async fn migrate(&self, client: &dyn RegistrationClient) -> Result<MigrationReport, AdminError> {
        let mut report = MigrationReport::default();

        for domain in &self.domains {
            report.record(client.register_domain(domain).await)?;
        }
        for workflow in &self.workflow_types {
            report.record(client.register_workflow_type(workflow).await)?;
        }
        for activity in &self.activity_types {
            report.record(client.register_activity_type(activity).await)?;
        }
        for stream in &self.streams {
            report.record(client.create_stream(stream).await)?;
            self.await_active(client, &stream.name).await?;
        }
        for name in &self.deprecated_domains {
            report.record(client.deprecate_domain(name).await)?;
        }
        for workflow in &self.deprecated_workflow_types {
            report.record(client.deprecate_workflow_type(workflow).await)?;
        }
        for activity in &self.deprecated_activity_types {
            report.record(client.deprecate_activity_type(activity).await)?;
        }

        tracing::info!(applied = report.applied, skipped = report.skipped, "migration finished");
        Ok(report)
    }

    async fn await_active(&self, client: &dyn RegistrationClient, name: &str) -> Result<(), AdminError> {
        for attempt in 1..=self.stream_poll_attempts {
            let status = client.describe_stream(name).await?;
            if status == StreamStatus::Active {
                return Ok(());
            }
            tracing::debug!(stream = name, ?status, attempt, "waiting for stream");
            tokio::time::sleep(self.stream_poll_interval).await;
        }
        Err(AdminError::Service(format!("stream {name} did not become active")))
    }
}
