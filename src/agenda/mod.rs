// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 tickle contributors

//! Agenda model and compiler
//!
//! The agenda is the user-authored declaration of procs (argument
//! templates), flows (ordered stages of proc names) and tasks (concrete
//! invocations with inputs and outputs). Compilation validates the
//! declaration, materializes argv commands, resolves paths against the
//! target directory and fingerprints each task for identity recovery.

mod template;

pub use template::ProcTemplate;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::cache::hash;
use crate::errors::{TickleError, TickleResult};
use crate::utils::paths;

/// A task definition as written in the agenda file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDef {
    /// Human label
    pub desc: String,

    /// Proc this task invokes
    pub proc: String,

    /// Flows this task participates in (at least one)
    pub flows: Vec<String>,

    /// Argument value lists by parameter name
    pub args: BTreeMap<String, Vec<String>>,

    /// Input file paths, relative to the target directory
    pub inputs: Vec<String>,

    /// Output file paths, relative to the target directory
    pub outputs: Vec<String>,
}

/// The agenda file contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agenda {
    /// Named argument templates
    #[serde(default)]
    pub procs: BTreeMap<String, Vec<String>>,

    /// Named workflows: ordered stages, each a set of proc names
    #[serde(default)]
    pub flows: BTreeMap<String, Vec<Vec<String>>>,

    /// Ordered task definitions
    #[serde(default)]
    pub tasks: Vec<TaskDef>,
}

impl Agenda {
    /// Load an agenda from a YAML file.
    pub fn load(path: &Path) -> TickleResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| TickleError::Io {
            message: format!("failed to read '{}': {}", path.display(), e),
        })?;
        Self::from_yaml(path, &content)
    }

    /// Parse an agenda from a YAML string. An empty document (including
    /// comment-only files) yields an empty agenda.
    pub fn from_yaml(path: &Path, yaml: &str) -> TickleResult<Self> {
        let agenda: Option<Self> =
            serde_yaml::from_str(yaml).map_err(|e| TickleError::schema(path, e))?;
        Ok(agenda.unwrap_or_default())
    }

    /// Store the agenda as YAML.
    pub fn store(&self, path: &Path) -> TickleResult<()> {
        let yaml = serde_yaml::to_string(self)
            .map_err(|e| TickleError::schema(path, e))?;
        std::fs::write(path, yaml).map_err(|e| TickleError::Io {
            message: format!("failed to write '{}': {}", path.display(), e),
        })?;
        Ok(())
    }
}

/// A task after compilation: argv command, absolute paths, flow stages
#[derive(Debug, Clone)]
pub struct CompiledTask {
    /// Stable 128-bit content fingerprint for identity recovery
    pub hash: String,

    /// Human label
    pub description: String,

    /// Stage index per flow this task participates in
    pub flows: BTreeMap<String, usize>,

    /// The argv vector to spawn
    pub command: Vec<String>,

    /// Absolute input paths
    pub inputs: BTreeSet<PathBuf>,

    /// Absolute output paths
    pub outputs: BTreeSet<PathBuf>,
}

/// Compiled form of the whole agenda, in task order
pub type CompiledAgenda = Vec<CompiledTask>;

/// Compile an agenda against a target directory.
pub fn compile(target_dir: &Path, agenda: &Agenda) -> TickleResult<CompiledAgenda> {
    // Compile proc templates
    let procs: BTreeMap<&str, ProcTemplate> = agenda
        .procs
        .iter()
        .map(|(name, parts)| (name.as_str(), ProcTemplate::compile(name, parts)))
        .collect();

    // Pin procs to stages per flow
    let mut flow_stages: BTreeMap<&str, BTreeMap<&str, usize>> = BTreeMap::new();
    for (flow_name, stages) in &agenda.flows {
        let table = flow_stages.entry(flow_name.as_str()).or_default();
        for (stage_index, stage) in stages.iter().enumerate() {
            for proc_name in stage {
                if !procs.contains_key(proc_name.as_str()) {
                    return Err(TickleError::UnknownProc {
                        proc: proc_name.clone(),
                        site: format!("flow '{flow_name}'"),
                    });
                }
                if table.insert(proc_name.as_str(), stage_index).is_some() {
                    return Err(TickleError::DuplicateInFlow {
                        flow: flow_name.clone(),
                        proc: proc_name.clone(),
                    });
                }
            }
        }
    }

    // Compile tasks
    let mut compiled = Vec::with_capacity(agenda.tasks.len());
    for task in &agenda.tasks {
        let template = procs.get(task.proc.as_str()).ok_or_else(|| {
            TickleError::UnknownProc {
                proc: task.proc.clone(),
                site: format!("task '{}'", task.desc),
            }
        })?;

        if task.flows.is_empty() {
            return Err(TickleError::InvalidTask {
                task: task.desc.clone(),
                reason: "must list at least one flow".into(),
            });
        }
        let mut flows = BTreeMap::new();
        for flow_name in &task.flows {
            let table = flow_stages.get(flow_name.as_str()).ok_or_else(|| {
                TickleError::UnknownFlow {
                    task: task.desc.clone(),
                    flow: flow_name.clone(),
                }
            })?;
            let stage = table.get(task.proc.as_str()).ok_or_else(|| {
                TickleError::InvalidTask {
                    task: task.desc.clone(),
                    reason: format!(
                        "proc '{}' is not assigned to a stage of flow '{}'",
                        task.proc, flow_name
                    ),
                }
            })?;
            flows.insert(flow_name.clone(), *stage);
        }

        let command = template.apply(&task.args)?;
        if command.is_empty() {
            return Err(TickleError::InvalidTask {
                task: task.desc.clone(),
                reason: "compiles to an empty command".into(),
            });
        }

        compiled.push(CompiledTask {
            hash: hash::fingerprint_task(task),
            description: task.desc.clone(),
            flows,
            command,
            inputs: task
                .inputs
                .iter()
                .map(|raw| paths::resolve(target_dir, raw))
                .collect(),
            outputs: task
                .outputs
                .iter()
                .map(|raw| paths::resolve(target_dir, raw))
                .collect(),
        });
    }

    Ok(compiled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_agenda() -> Agenda {
        let yaml = r#"
procs:
  compile: [gcc, -c, $source, -o, $object]
  link: [gcc, $objects, -o, $binary]
flows:
  build:
    - [compile]
    - [link]
tasks:
  - desc: Compile main
    proc: compile
    flows: [build]
    args: { source: [main.c], object: [main.o] }
    inputs: [main.c]
    outputs: [main.o]
  - desc: Link app
    proc: link
    flows: [build]
    args: { objects: [main.o], binary: [app] }
    inputs: [main.o]
    outputs: [app]
"#;
        Agenda::from_yaml(Path::new("agenda.yaml"), yaml).unwrap()
    }

    #[test]
    fn test_compile_resolves_paths_and_stages() {
        let agenda = make_agenda();
        let compiled = compile(Path::new("/work"), &agenda).unwrap();

        assert_eq!(compiled.len(), 2);
        assert_eq!(compiled[0].command, vec!["gcc", "-c", "main.c", "-o", "main.o"]);
        assert_eq!(compiled[0].flows["build"], 0);
        assert_eq!(compiled[1].flows["build"], 1);
        assert!(compiled[0].outputs.contains(Path::new("/work/main.o")));
        assert!(compiled[1].inputs.contains(Path::new("/work/main.o")));
    }

    #[test]
    fn test_unknown_proc_in_task() {
        let mut agenda = make_agenda();
        agenda.tasks[0].proc = "missing".into();
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::UnknownProc { .. })));
    }

    #[test]
    fn test_unknown_proc_in_flow() {
        let mut agenda = make_agenda();
        agenda.flows.get_mut("build").unwrap().push(vec!["missing".into()]);
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::UnknownProc { .. })));
    }

    #[test]
    fn test_duplicate_proc_in_flow() {
        let mut agenda = make_agenda();
        agenda
            .flows
            .get_mut("build")
            .unwrap()
            .push(vec!["compile".into()]);
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::DuplicateInFlow { .. })));
    }

    #[test]
    fn test_unknown_flow() {
        let mut agenda = make_agenda();
        agenda.tasks[0].flows = vec!["missing".into()];
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::UnknownFlow { .. })));
    }

    #[test]
    fn test_task_requires_a_flow() {
        let mut agenda = make_agenda();
        agenda.tasks[0].flows.clear();
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::InvalidTask { .. })));
    }

    #[test]
    fn test_proc_must_be_member_of_listed_flow() {
        let mut agenda = make_agenda();
        agenda.procs.insert("other".into(), vec!["true".into()]);
        agenda.tasks[0].proc = "other".into();
        agenda.tasks[0].args.clear();
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::InvalidTask { .. })));
    }

    #[test]
    fn test_missing_argument_surfaces() {
        let mut agenda = make_agenda();
        agenda.tasks[0].args.remove("source");
        let result = compile(Path::new("/work"), &agenda);
        assert!(matches!(result, Err(TickleError::MissingArgument { .. })));
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("agenda.yaml");
        let agenda = make_agenda();
        agenda.store(&path).unwrap();
        assert_eq!(Agenda::load(&path).unwrap(), agenda);
    }

    #[test]
    fn test_malformed_yaml_is_schema_error() {
        let result = Agenda::from_yaml(Path::new("agenda.yaml"), "procs: [not, a, map]");
        assert!(matches!(result, Err(TickleError::Schema { .. })));
    }

    #[test]
    fn test_missing_task_field_is_schema_error() {
        let yaml = r#"
tasks:
  - desc: Incomplete
    proc: compile
"#;
        let result = Agenda::from_yaml(Path::new("agenda.yaml"), yaml);
        assert!(matches!(result, Err(TickleError::Schema { .. })));
    }
}
