//! Cluster label resolution
//!
//! A task's admission namespace is the primary label of the cluster it
//! runs on. The label comes from the task's own override, or from the
//! (project, domain) destination table, or falls back to the default.

use std::collections::HashMap;

use tracing::debug;

use crate::config::ClusterSettings;
use crate::plugin::ResourceNamespace;

/// Read-only label tables built from configuration
#[derive(Debug, Clone)]
pub struct LabelResolver {
    default_primary_label: String,
    primary_by_label: HashMap<String, String>,
    label_by_destination: HashMap<(String, String), String>,
}

impl LabelResolver {
    pub fn from_settings(settings: &ClusterSettings) -> Self {
        let mut primary_by_label = HashMap::new();
        for cluster in &settings.cluster_configs {
            for label in &cluster.labels {
                primary_by_label.insert(label.clone(), cluster.primary_label.clone());
            }
        }

        let mut label_by_destination = HashMap::new();
        for dest in &settings.destination_cluster_configs {
            label_by_destination
                .entry((dest.project.clone(), dest.domain.clone()))
                .or_insert_with(|| dest.cluster_label.clone());
        }

        Self {
            default_primary_label: settings.default_primary_label.clone(),
            primary_by_label,
            label_by_destination,
        }
    }

    pub fn default_primary_label(&self) -> &str {
        &self.default_primary_label
    }

    /// Primary label a label maps to, if any
    pub fn map_label(&self, label: &str) -> Option<&str> {
        if label.is_empty() {
            return None;
        }
        self.primary_by_label.get(label).map(String::as_str)
    }

    /// Cluster label configured for a (project, domain) pair, if any
    pub fn destination_label(&self, project: &str, domain: &str) -> Option<&str> {
        self.label_by_destination
            .get(&(project.to_string(), domain.to_string()))
            .map(String::as_str)
    }

    /// Primary cluster label for a task
    ///
    /// An override label that maps wins. Otherwise the destination label
    /// for (project, domain) is mapped, falling back to the default when
    /// that label is itself unmapped. Otherwise the default.
    pub fn primary_label(&self, override_label: Option<&str>, project: &str, domain: &str) -> &str {
        if let Some(primary) = override_label.and_then(|l| self.map_label(l)) {
            debug!(label = ?override_label, primary, "Resolved primary label from override");
            return primary;
        }

        if let Some(label) = self.destination_label(project, domain) {
            let primary = self.map_label(label).unwrap_or(&self.default_primary_label);
            debug!(project, domain, label, primary, "Resolved primary label from destination table");
            return primary;
        }

        debug!(project, domain, default = %self.default_primary_label, "Using default primary label");
        &self.default_primary_label
    }

    /// Admission namespace for a task
    pub fn namespace(&self, override_label: Option<&str>, project: &str, domain: &str) -> ResourceNamespace {
        ResourceNamespace::new(self.primary_label(override_label, project, domain))
    }
}
