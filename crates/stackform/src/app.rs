//! The app and synthesis.
//!
//! An [`App`] is the root of the construct tree and owns the token arena.
//! `synth` walks the tree, resolves every stack's document and writes a
//! cloud assembly: one template file per stack plus a manifest describing
//! artifacts, environments and deployment order.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use snafu::prelude::*;

use crate::{
    construct::Node, stack::Stack, token::TokenRegistry, CreateFileSnafu, DeserializeSnafu, Error,
    ReadFileSnafu, Result, SerializeSnafu, WriteFileSnafu,
};

const MANIFEST_VERSION: &str = "1.0";
const STACK_ARTIFACT_TYPE: &str = "aws:cloudformation:stack";

/// The root of a construct tree.
///
/// Every app carries its own token arena; tokens never cross apps.
pub struct App {
    node: Node,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> App {
        App {
            node: Node::root(TokenRegistry::new()),
        }
    }

    /// The root node, the scope to put stacks under.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Synthesize every stack in the tree into `outdir`.
    ///
    /// Resolution runs twice per stack: a preparing walk whose output is
    /// discarded but whose side effects register cross-stack exports and
    /// dependencies, then the final walk that renders the templates. The
    /// deployment order is scheduled from the recorded dependencies.
    pub fn synth(&self, outdir: impl AsRef<Path>) -> Result<CloudAssembly> {
        let outdir = outdir.as_ref();
        std::fs::create_dir_all(outdir).context(CreateFileSnafu { path: outdir })?;

        let stacks: Vec<Stack> = self
            .node
            .find_all()
            .iter()
            .filter_map(Stack::attached)
            .collect();
        log::info!("synthesizing {} stack(s) into {outdir:?}", stacks.len());

        for stack in &stacks {
            let _ = stack.render(true)?;
        }

        // Everything is rendered in deployment order. The order doesn't
        // change the templates, but it surfaces dependency cycles and
        // fixes the manifest's ordering guarantees.
        let mut graph: dagga::Dag<Stack, usize> = dagga::Dag::default();
        let key_by_path: BTreeMap<String, usize> = stacks
            .iter()
            .enumerate()
            .map(|(key, stack)| (stack.node().path_str(), key))
            .collect();
        for (key, stack) in stacks.iter().enumerate() {
            let reads: Vec<usize> = stack
                .dependency_paths()
                .iter()
                .filter_map(|path| key_by_path.get(path).copied())
                .collect();
            graph.add_node(
                dagga::Node::new(stack.clone())
                    .with_name(stack.artifact_id())
                    .with_reads(reads)
                    .with_result(key),
            );
        }
        let schedule = graph
            .build_schedule()
            .map_err(|e| Error::Schedule { msg: e.to_string() })?;

        let mut artifacts = BTreeMap::new();
        for (i, batch) in schedule.batches.into_iter().enumerate() {
            for node in batch.into_iter() {
                let stack = node.into_inner();
                let artifact_id = stack.artifact_id();
                log::debug!("rendering '{artifact_id}' in batch {i}");
                let document = stack.render(false)?;
                let template_file = format!("{artifact_id}.template.json");
                let rendered = serde_json::to_string_pretty(&document.to_json())
                    .context(SerializeSnafu {
                        name: template_file.clone(),
                    })?;
                let path = outdir.join(&template_file);
                std::fs::write(&path, rendered).context(WriteFileSnafu { path })?;

                artifacts.insert(
                    artifact_id,
                    ManifestArtifact {
                        ty: STACK_ARTIFACT_TYPE.to_owned(),
                        environment: stack.environment(),
                        properties: ArtifactProperties {
                            template_file,
                            stack_name: stack.stack_name(),
                        },
                        dependencies: stack
                            .dependency_paths()
                            .iter()
                            .map(|path| path.replace('/', "-"))
                            .collect(),
                    },
                );
            }
        }

        let manifest = Manifest {
            version: MANIFEST_VERSION.to_owned(),
            artifacts,
        };
        let rendered = serde_json::to_string_pretty(&manifest).context(SerializeSnafu {
            name: "manifest.json",
        })?;
        let path = outdir.join("manifest.json");
        std::fs::write(&path, rendered).context(WriteFileSnafu { path })?;

        Ok(CloudAssembly {
            directory: outdir.to_owned(),
            manifest,
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Manifest {
    pub version: String,
    pub artifacts: BTreeMap<String, ManifestArtifact>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestArtifact {
    #[serde(rename = "type")]
    pub ty: String,
    pub environment: String,
    pub properties: ArtifactProperties,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactProperties {
    #[serde(rename = "templateFile")]
    pub template_file: String,
    #[serde(rename = "stackName")]
    pub stack_name: String,
}

/// The output of one synthesis: a directory of template files plus the
/// manifest describing them.
pub struct CloudAssembly {
    directory: PathBuf,
    manifest: Manifest,
}

impl CloudAssembly {
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn artifact_ids(&self) -> Vec<String> {
        self.manifest.artifacts.keys().cloned().collect()
    }

    /// Re-read a synthesized template from disk.
    pub fn template(&self, artifact_id: &str) -> Result<serde_json::Value> {
        let artifact =
            self.manifest
                .artifacts
                .get(artifact_id)
                .ok_or_else(|| Error::MissingArtifact {
                    id: artifact_id.to_owned(),
                })?;
        let path = self.directory.join(&artifact.properties.template_file);
        let raw = std::fs::read_to_string(&path).context(ReadFileSnafu { path })?;
        serde_json::from_str(&raw).context(DeserializeSnafu {
            name: artifact.properties.template_file.clone(),
        })
    }
}
