//! Bootstrap templates: declarative seed data applied once per version.
//!
//! A template is a named, versioned list of mutation proposals. Once all of
//! its proposals are applied, a completion marker is written on the template's
//! upgrade entity. The marker records the template version and a content hash,
//! so a template whose proposals change is applied again.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::entity::{EntityService, WriteMode};
use crate::error::UpgradeError;
use crate::types::{entity_type_of, now_millis, upgrade_marker_urn};
use crate::upgrade::{StepContext, StepResult, UpgradeStep};

pub const UPGRADE_RESULT_ASPECT: &str = "upgradeResult";

/// Manifest compiled into the binary, used when no manifest path is configured.
pub const DEFAULT_MANIFEST: &str = include_str!("bootstrap_templates.toml");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationProposal {
    pub entity_urn: String,
    pub aspect_name: String,
    pub payload: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapTemplate {
    pub name: String,
    pub version: u32,
    /// Must be applied before the platform reports ready.
    #[serde(default)]
    pub blocking: bool,
    /// A failure is recorded but does not stop the upgrade.
    #[serde(default)]
    pub optional: bool,
    #[serde(default, rename = "proposal")]
    pub proposals: Vec<MutationProposal>,
}

impl BootstrapTemplate {
    pub fn step_id(&self) -> String {
        format!("bootstrap-{}", self.name)
    }

    pub fn marker_urn(&self) -> String {
        upgrade_marker_urn(&self.step_id())
    }

    /// Hex blake3 digest over the proposals, in declaration order.
    pub fn content_hash(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        for proposal in &self.proposals {
            hasher.update(proposal.entity_urn.as_bytes());
            hasher.update(&[0]);
            hasher.update(proposal.aspect_name.as_bytes());
            hasher.update(&[0]);
            hasher.update(proposal.payload.to_string().as_bytes());
            hasher.update(&[0]);
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    fn marker_payload(&self, content_hash: &str, run_id: &str) -> Value {
        json!({
            "state": "SUCCEEDED",
            "version": self.version,
            "contentHash": content_hash,
            "runId": run_id,
            "completedAtMs": now_millis(),
        })
    }

    fn marker_matches(&self, marker: &Value, content_hash: &str) -> bool {
        marker.get("version").and_then(Value::as_u64) == Some(u64::from(self.version))
            && marker.get("contentHash").and_then(Value::as_str) == Some(content_hash)
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default, rename = "template")]
    templates: Vec<BootstrapTemplate>,
}

/// Parse and check a TOML manifest.
pub fn parse_manifest(text: &str) -> Result<Vec<BootstrapTemplate>, UpgradeError> {
    let manifest: Manifest = toml::from_str(text).map_err(|e| {
        UpgradeError::ConfigurationDefect(format!("invalid bootstrap manifest: {}", e))
    })?;

    let mut names = HashSet::new();
    for template in &manifest.templates {
        if template.name.trim().is_empty() {
            return Err(UpgradeError::ConfigurationDefect(
                "bootstrap template with empty name".to_string(),
            ));
        }
        if !names.insert(template.name.as_str()) {
            return Err(UpgradeError::ConfigurationDefect(format!(
                "bootstrap template {} declared twice",
                template.name
            )));
        }
        for proposal in &template.proposals {
            if entity_type_of(&proposal.entity_urn).is_none() {
                return Err(UpgradeError::ConfigurationDefect(format!(
                    "bootstrap template {}: malformed urn {}",
                    template.name, proposal.entity_urn
                )));
            }
        }
    }
    Ok(manifest.templates)
}

/// Load the manifest at `path`, or the built-in one.
pub fn load_manifest(path: Option<&Path>) -> Result<Vec<BootstrapTemplate>, UpgradeError> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|e| {
                UpgradeError::ConfigurationDefect(format!(
                    "cannot read bootstrap manifest {}: {}",
                    path.display(),
                    e
                ))
            })?;
            parse_manifest(&text)
        }
        None => parse_manifest(DEFAULT_MANIFEST),
    }
}

/// Applies one template.
pub struct BootstrapStep {
    id: String,
    template: BootstrapTemplate,
    entities: EntityService,
    enabled: bool,
}

impl BootstrapStep {
    pub fn new(template: BootstrapTemplate, entities: EntityService) -> Self {
        Self {
            id: template.step_id(),
            template,
            entities,
            enabled: true,
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn template(&self) -> &BootstrapTemplate {
        &self.template
    }
}

impl UpgradeStep for BootstrapStep {
    fn id(&self) -> &str {
        &self.id
    }

    fn skippable(&self) -> bool {
        self.template.optional
    }

    fn retryable(&self) -> bool {
        true
    }

    fn skip(&self, _ctx: &StepContext<'_>) -> Option<String> {
        (!self.enabled).then(|| format!("template {} disabled by configuration", self.template.name))
    }

    fn execute(&self, ctx: &StepContext<'_>) -> Result<StepResult, UpgradeError> {
        let content_hash = self.template.content_hash();
        let marker_urn = self.template.marker_urn();

        if let Some(marker) = self
            .entities
            .store()
            .get_aspect(&marker_urn, UPGRADE_RESULT_ASPECT)?
        {
            if self.template.marker_matches(&marker.payload, &content_hash) {
                debug!(template = %self.template.name, "Template already applied");
                return Ok(StepResult::succeeded(false).with_message(format!(
                    "template {} v{} already applied",
                    self.template.name, self.template.version
                )));
            }
        }

        let total = self.template.proposals.len();
        let mut written = 0usize;
        for (index, proposal) in self.template.proposals.iter().enumerate() {
            if let Some(interruption) = ctx.interruption() {
                return Ok(StepResult::failed(format!(
                    "{} after {} of {} proposals",
                    interruption, index, total
                )));
            }
            match self.entities.ingest(
                ctx.op_context(),
                ctx.run_id(),
                &proposal.entity_urn,
                &proposal.aspect_name,
                &proposal.payload,
                WriteMode::IfChanged,
            ) {
                Ok(outcome) => {
                    if outcome.written() {
                        written += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        template = %self.template.name,
                        urn = %proposal.entity_urn,
                        aspect = %proposal.aspect_name,
                        error = %e,
                        "Bootstrap proposal failed"
                    );
                    return Ok(StepResult::failed(format!(
                        "proposal {} of {} ({} {}) failed: {}",
                        index + 1,
                        total,
                        proposal.entity_urn,
                        proposal.aspect_name,
                        e
                    )));
                }
            }
        }

        let marker = self.template.marker_payload(&content_hash, ctx.run_id());
        self.entities.ingest(
            ctx.op_context(),
            ctx.run_id(),
            &marker_urn,
            UPGRADE_RESULT_ASPECT,
            &marker,
            WriteMode::Always,
        )?;

        info!(
            template = %self.template.name,
            version = self.template.version,
            written,
            total,
            "Applied bootstrap template"
        );
        Ok(StepResult::succeeded(true).with_message(format!(
            "wrote {} of {} proposals",
            written, total
        )))
    }

    fn as_bootstrap(&self) -> Option<&BootstrapStep> {
        Some(self)
    }
}
