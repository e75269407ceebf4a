//! Project Registry (C10): loads the versioned, on-disk project/source
//! layout and exposes read-only enumeration and scoping to the rest of
//! the pipeline.
//!
//! Layout under `registry.config_root` (see [`crate::config::RegistryConfig`]):
//!
//! ```text
//! <config-root>/
//!   projects/<projectId>.json
//!   sources/<sourceId>.json
//!   mapping.json
//! ```
//!
//! `mapping.json` is the join table: `{"projects": [{"projectId", "sourceIds": [...]}]}`.
//! Loading validates every id against `^[a-z][a-z0-9-]*$` and checks
//! referential integrity — every source id named in the mapping must have
//! a matching `sources/<id>.json`, and every project id must have a
//! matching `projects/<id>.json`. Once loaded, the registry is immutable
//! for the lifetime of a run, matching the teacher's load-once,
//! validate-eagerly `load_config` idiom in `config.rs`.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::config::QualityConfig;
use crate::models::{Project, Source, TrustLevel};

#[derive(Debug, Deserialize)]
struct MappingFile {
    projects: Vec<MappingEntry>,
}

#[derive(Debug, Deserialize)]
struct MappingEntry {
    project_id: String,
    #[serde(default)]
    source_ids: Vec<String>,
}

pub struct Registry {
    projects: HashMap<String, Project>,
    sources: HashMap<String, Source>,
    sources_by_project: HashMap<String, Vec<String>>,
}

impl Registry {
    /// Load and validate the whole on-disk layout rooted at `config_root`.
    /// `quality` supplies the default trust-level thresholds backfilled
    /// into any `GitHubRepo` source whose JSON file doesn't set its own
    /// `quality` block.
    pub fn load(config_root: &Path, quality: &QualityConfig) -> Result<Self> {
        let mapping_path = config_root.join("mapping.json");
        let mapping_content = std::fs::read_to_string(&mapping_path)
            .with_context(|| format!("Failed to read mapping file: {}", mapping_path.display()))?;
        let mapping: MappingFile = serde_json::from_str(&mapping_content)
            .with_context(|| format!("Failed to parse mapping file: {}", mapping_path.display()))?;

        let mut projects = HashMap::new();
        let mut sources = HashMap::new();
        let mut sources_by_project = HashMap::new();

        for entry in &mapping.projects {
            validate_id(&entry.project_id)
                .with_context(|| format!("invalid projectId '{}'", entry.project_id))?;

            let project = load_project(config_root, &entry.project_id)?;
            if project.id != entry.project_id {
                anyhow::bail!(
                    "projects/{}.json has id '{}', expected '{}'",
                    entry.project_id,
                    project.id,
                    entry.project_id
                );
            }
            projects.insert(entry.project_id.clone(), project);

            let mut source_ids = Vec::with_capacity(entry.source_ids.len());
            for source_id in &entry.source_ids {
                validate_id(source_id).with_context(|| format!("invalid sourceId '{source_id}'"))?;

                let source = load_source(config_root, source_id, quality)?;
                if source.id() != source_id {
                    anyhow::bail!(
                        "sources/{}.json has id '{}', expected '{}'",
                        source_id,
                        source.id(),
                        source_id
                    );
                }
                if source.project_id() != entry.project_id {
                    anyhow::bail!(
                        "source '{}' is mapped under project '{}' but declares project_id '{}'",
                        source_id,
                        entry.project_id,
                        source.project_id()
                    );
                }
                sources.insert(source_id.clone(), source);
                source_ids.push(source_id.clone());
            }
            sources_by_project.insert(entry.project_id.clone(), source_ids);
        }

        Ok(Self {
            projects,
            sources,
            sources_by_project,
        })
    }

    pub fn list_projects(&self) -> Vec<&Project> {
        self.projects.values().collect()
    }

    pub fn load_project(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn contains_project(&self, id: &str) -> bool {
        self.projects.contains_key(id)
    }

    pub fn list_sources_for(&self, project_id: &str) -> Vec<&Source> {
        self.sources_by_project
            .get(project_id)
            .map(|ids| ids.iter().filter_map(|id| self.sources.get(id)).collect())
            .unwrap_or_default()
    }

    pub fn load_source(&self, id: &str) -> Option<&Source> {
        self.sources.get(id)
    }
}

/// Validate against `^[a-z][a-z0-9-]*$`.
fn validate_id(id: &str) -> Result<()> {
    let mut chars = id.chars();
    let first_ok = matches!(chars.next(), Some(c) if c.is_ascii_lowercase());
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if first_ok && rest_ok {
        Ok(())
    } else {
        anyhow::bail!("id must match ^[a-z][a-z0-9-]*$, got '{id}'")
    }
}

fn load_project(config_root: &Path, id: &str) -> Result<Project> {
    let path = config_root.join("projects").join(format!("{id}.json"));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read project file: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse project file: {}", path.display()))
}

fn load_source(config_root: &Path, id: &str, quality: &QualityConfig) -> Result<Source> {
    let path = config_root.join("sources").join(format!("{id}.json"));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read source file: {}", path.display()))?;
    let raw: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse source file: {}", path.display()))?;
    let mut source: Source = serde_json::from_value(raw.clone())
        .with_context(|| format!("Failed to parse source file: {}", path.display()))?;

    let explicit_quality = raw.get("quality").is_some();
    if !explicit_quality {
        if let Source::GitHubRepo {
            trust_level,
            quality: slot,
            ..
        } = &mut source
        {
            let resolved = quality.for_trust_level(*trust_level);
            slot.min_doc_score = resolved.min_doc_score;
            slot.min_llm_score = resolved.min_llm_score;
            slot.require_readme = resolved.require_readme;
        }
    }

    Ok(source)
}

#[allow(dead_code)]
fn trust_level_name(level: TrustLevel) -> &'static str {
    match level {
        TrustLevel::Official => "official",
        TrustLevel::VerifiedCommunity => "verified-community",
        TrustLevel::Community => "community",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_layout(root: &Path) {
        fs::create_dir_all(root.join("projects")).unwrap();
        fs::create_dir_all(root.join("sources")).unwrap();
        fs::write(
            root.join("projects/mina.json"),
            r#"{"id": "mina", "name": "Mina Protocol"}"#,
        )
        .unwrap();
        fs::write(
            root.join("sources/mina-docs.json"),
            r#"{"kind": "local-markdown", "id": "mina-docs", "project_id": "mina", "root": "/tmp/mina", "url_prefix": "mina"}"#,
        )
        .unwrap();
        fs::write(
            root.join("sources/mina-sdk.json"),
            r#"{"kind": "github-repo", "id": "mina-sdk", "project_id": "mina", "owner": "o1-labs", "repo": "o1js", "repo_type": "sdk", "trust_level": "official"}"#,
        )
        .unwrap();
        fs::write(
            root.join("mapping.json"),
            r#"{"projects": [{"project_id": "mina", "source_ids": ["mina-docs", "mina-sdk"]}]}"#,
        )
        .unwrap();
    }

    #[test]
    fn loads_projects_and_sources_from_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path());
        let quality = QualityConfig::default();
        let registry = Registry::load(dir.path(), &quality).unwrap();

        assert!(registry.contains_project("mina"));
        assert_eq!(registry.list_sources_for("mina").len(), 2);
    }

    #[test]
    fn backfills_quality_thresholds_from_trust_level() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path());
        let quality = QualityConfig::default();
        let registry = Registry::load(dir.path(), &quality).unwrap();

        let source = registry.load_source("mina-sdk").unwrap();
        assert_eq!(source.quality().min_doc_score, quality.official.min_doc_score);
    }

    #[test]
    fn rejects_invalid_project_id() {
        assert!(validate_id("Mina").is_err());
        assert!(validate_id("1mina").is_err());
        assert!(validate_id("mina_protocol").is_err());
        assert!(validate_id("mina-protocol").is_ok());
    }

    #[test]
    fn unknown_project_is_not_registered() {
        let dir = tempfile::tempdir().unwrap();
        write_layout(dir.path());
        let quality = QualityConfig::default();
        let registry = Registry::load(dir.path(), &quality).unwrap();
        assert!(!registry.contains_project("solana"));
    }
}
