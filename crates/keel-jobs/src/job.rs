//! Job inputs and outcomes.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deploy::DeployOutcome;
use crate::template::TemplateOutcome;

/// Roll out one deployment record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployJob {
    pub deployment_id: String,
    #[serde(default)]
    pub project_id: String,
    pub tenant_id: String,
}

/// Stand up every service of a template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateJob {
    pub template_deployment_id: String,
    pub template_id: String,
    pub project_id: String,
    pub tenant_id: String,
    /// User inputs keyed `<service name>.<key>`.
    #[serde(default)]
    pub inputs: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    Deploy(DeployJob),
    Template(TemplateJob),
}

impl Job {
    /// Queue identity. At most one run per id is in flight.
    pub fn id(&self) -> String {
        match self {
            Self::Deploy(job) => format!("deploy:{}", job.deployment_id),
            Self::Template(job) => format!("template:{}", job.template_deployment_id),
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            Self::Deploy(job) => &job.tenant_id,
            Self::Template(job) => &job.tenant_id,
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Deploy(DeployOutcome),
    Template(TemplateOutcome),
}
