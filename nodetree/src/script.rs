use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use common::{FileFormat, SerdeFormatResult};
use hashbrown::{HashMap, HashSet};
use tracing::{debug, info};

use crate::data::ParamValue;
use crate::descriptor::NodeDescriptor;
use crate::error::{ConstructionError, ValidationIssue};
use crate::eval::EvalStats;
use crate::node::{InputBinding, Node, NodeId, Stage};
use crate::param::Params;
use crate::registry::Registry;

pub const FILE_OUT_TYPE: &str = "Utils::FileOut";

/// A graph of node instances addressed by unique name.
///
/// Nodes live in an arena indexed by [`NodeId`]; every edge is also kept in
/// reverse so dirty propagation and terminal detection never scan the whole
/// graph. The graph is acyclic at all times: construction and rewiring both
/// reject edges that would close a cycle.
#[derive(Clone, Debug)]
pub struct Script {
    pub(crate) nodes: Vec<Node>,
    pub(crate) by_name: HashMap<String, NodeId>,
    pub(crate) dependents: Vec<Vec<NodeId>>,
    pub(crate) registry: Arc<Registry>,
    pub(crate) stats: EvalStats,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
enum ProcessState {
    #[default]
    None,
    Processing,
    Done,
}

#[derive(Debug)]
enum VisitCause {
    Enter,
    Done,
}

#[derive(Debug)]
struct Visit {
    node_idx: usize,
    cause: VisitCause,
}

impl Script {
    pub fn new(registry: Arc<Registry>) -> Self {
        Script {
            nodes: vec![],
            by_name: HashMap::new(),
            dependents: vec![],
            registry,
            stats: EvalStats::default(),
        }
    }

    /// Builds a script from an ordered descriptor sequence.
    ///
    /// Every node is instantiated before any input is wired, so descriptors
    /// may reference nodes declared later in the sequence.
    pub fn build(
        descriptors: &[NodeDescriptor],
        registry: Arc<Registry>,
    ) -> Result<Self, ConstructionError> {
        let mut names: HashSet<&str> = HashSet::with_capacity(descriptors.len());
        for descriptor in descriptors.iter() {
            if !names.insert(descriptor.name.as_str()) {
                return Err(ConstructionError::DuplicateName(descriptor.name.clone()));
            }
        }

        let mut script = Script::new(registry);
        for descriptor in descriptors.iter() {
            let mut node = script
                .registry
                .get_new_node(
                    &descriptor.type_name,
                    &descriptor.name,
                    descriptor.params.clone(),
                )
                .map_err(|source| ConstructionError::Registry {
                    node: descriptor.name.clone(),
                    source,
                })?;
            node.ignored = descriptor.ignored;
            node.meta = descriptor.meta.clone();
            script.insert(node);
        }

        for descriptor in descriptors.iter() {
            let id = script.by_name[descriptor.name.as_str()];
            let arity = script.nodes[id.index()].class.arity;
            if !arity.admits(descriptor.inputs.len()) {
                return Err(ConstructionError::Arity {
                    node: descriptor.name.clone(),
                    expected: arity,
                    found: descriptor.inputs.len(),
                });
            }

            let mut bindings = Vec::with_capacity(descriptor.inputs.len());
            for input_name in descriptor.inputs.iter() {
                let source = script.node_id(input_name).ok_or_else(|| {
                    ConstructionError::UnresolvedInput {
                        node: descriptor.name.clone(),
                        input: input_name.clone(),
                    }
                })?;
                bindings.push(Some(InputBinding {
                    source,
                    output_idx: 0,
                }));
            }

            for binding in bindings.iter().flatten() {
                script.dependents[binding.source.index()].push(id);
            }
            script.nodes[id.index()].inputs = bindings;
        }

        script.check_acyclic()?;

        info!("Built script with {} nodes", script.nodes.len());

        Ok(script)
    }

    pub fn from_str(
        serialized: &str,
        format: FileFormat,
        registry: Arc<Registry>,
    ) -> anyhow::Result<Self> {
        let descriptors: Vec<NodeDescriptor> = common::deserialize(serialized, format)?;
        Ok(Self::build(&descriptors, registry)?)
    }
    pub fn from_json(json: &str, registry: Arc<Registry>) -> anyhow::Result<Self> {
        Self::from_str(json, FileFormat::Json, registry)
    }
    pub fn from_yaml(yaml: &str, registry: Arc<Registry>) -> anyhow::Result<Self> {
        Self::from_str(yaml, FileFormat::Yaml, registry)
    }
    pub fn from_file(path: impl AsRef<Path>, registry: Arc<Registry>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let serialized = std::fs::read_to_string(path)?;
        Self::from_str(&serialized, format, registry)
    }

    /// Inverse of [`Script::build`], in insertion order.
    pub fn serialize(&self) -> Vec<NodeDescriptor> {
        self.nodes
            .iter()
            .map(|node| NodeDescriptor {
                name: node.name.clone(),
                type_name: node.type_name(),
                params: node.params.clone(),
                inputs: node
                    .inputs
                    .iter()
                    .flatten()
                    .map(|binding| self.nodes[binding.source.index()].name.clone())
                    .collect(),
                stage: Some(node.class.stage),
                ignored: node.ignored,
                meta: node.meta.clone(),
            })
            .collect()
    }

    pub fn to_string(&self, format: FileFormat) -> SerdeFormatResult<String> {
        common::serialize(&self.serialize(), format)
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }
    pub fn len(&self) -> usize {
        self.nodes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }
    pub fn node_id(&self, name: &str) -> Option<NodeId> {
        self.by_name.get(name).copied()
    }
    pub fn get_node(&self, name: &str) -> Option<&Node> {
        self.node_id(name).map(|id| &self.nodes[id.index()])
    }

    /// Nodes no other node consumes, in insertion order.
    pub fn get_terminals(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .filter(|node| !self.has_parents(node.id))
            .map(|node| node.id)
            .collect()
    }

    /// Whether any node consumes the output of `id`.
    pub fn has_parents(&self, id: NodeId) -> bool {
        self.dependents
            .get(id.index())
            .is_some_and(|dependents| !dependents.is_empty())
    }

    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        self.dependents
            .get(id.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Nodes whose attribute `attr` renders as `value`. Recognized attributes
    /// are `name`, `type`, `group`, `stage`, `output_type` and `ignored`.
    pub fn get_nodes_by_attr(&self, attr: &str, value: &str) -> Vec<NodeId> {
        let render = |node: &Node| -> Option<String> {
            match attr {
                "name" => Some(node.name.clone()),
                "type" => Some(node.type_name()),
                "group" => Some(node.class.group.clone()),
                "stage" => Some(node.class.stage.to_string()),
                "output_type" => Some(node.class.output_type.to_string()),
                "ignored" => Some(node.ignored.to_string()),
                _ => None,
            }
        };

        self.nodes
            .iter()
            .filter(|node| render(node).is_some_and(|rendered| rendered == value))
            .map(|node| node.id)
            .collect()
    }

    pub fn add_node(
        &mut self,
        type_name: &str,
        name: &str,
        params: Params,
    ) -> Result<NodeId, ConstructionError> {
        if self.by_name.contains_key(name) {
            return Err(ConstructionError::DuplicateName(name.to_string()));
        }

        let node = self
            .registry
            .get_new_node(type_name, name, params)
            .map_err(|source| ConstructionError::Registry {
                node: name.to_string(),
                source,
            })?;
        let id = self.insert(node);
        debug!("Added node {} ({})", name, type_name);

        Ok(id)
    }

    /// Wires output 0 of `source` into input `slot` of `id`. Variable-arity
    /// nodes grow by one slot when `slot` equals their current input count.
    pub fn set_input(
        &mut self,
        id: NodeId,
        slot: usize,
        source: NodeId,
    ) -> Result<(), ConstructionError> {
        self.check_id(source)?;
        let node = self.check_id(id)?;

        let max_slot = match node.class.arity {
            crate::node::Arity::Exact(count) => count,
            crate::node::Arity::Variable { .. } => node.inputs.len() + 1,
        };
        if slot >= max_slot {
            return Err(ConstructionError::InvalidSlot {
                node: node.name.clone(),
                slot,
            });
        }
        if self.depends_on(source, id) {
            return Err(ConstructionError::CycleDetected {
                node: node.name.clone(),
            });
        }

        let node = &mut self.nodes[id.index()];
        if slot == node.inputs.len() {
            node.inputs.push(None);
        }
        let previous = node.inputs[slot].replace(InputBinding {
            source,
            output_idx: 0,
        });

        if let Some(previous) = previous {
            let dependents = &mut self.dependents[previous.source.index()];
            if let Some(position) = dependents.iter().position(|dependent| *dependent == id) {
                dependents.swap_remove(position);
            }
        }
        self.dependents[source.index()].push(id);

        self.invalidate_recursively([id]);

        Ok(())
    }

    /// Stores a parameter without validating it and marks the node and
    /// everything downstream dirty. Validation happens on evaluation.
    pub fn set_param(
        &mut self,
        id: NodeId,
        key: &str,
        value: impl Into<ParamValue>,
    ) -> Result<(), ConstructionError> {
        self.check_id(id)?;
        self.nodes[id.index()].params.set(key, value.into());
        self.invalidate_recursively([id]);

        Ok(())
    }

    pub fn set_ignored(&mut self, id: NodeId, ignored: bool) -> Result<(), ConstructionError> {
        let node = self.check_id(id)?;
        if node.ignored != ignored {
            self.nodes[id.index()].ignored = ignored;
            self.invalidate_recursively([id]);
        }

        Ok(())
    }

    /// Sets the file path of the first node of the input stage.
    pub fn bind_input_file(&mut self, path: impl AsRef<Path>) -> Result<NodeId, ConstructionError> {
        let input_stage = Stage::Input.to_string();
        let id = self
            .get_nodes_by_attr("stage", &input_stage)
            .first()
            .copied()
            .ok_or(ConstructionError::MissingStage(input_stage))?;

        self.set_param(id, "path", path.as_ref().to_string_lossy().to_string())?;
        info!(
            "Bound input file {:?} to node {}",
            path.as_ref(),
            self.nodes[id.index()].name
        );

        Ok(id)
    }

    /// Appends a file writer fed by `source`, or by the terminal of the
    /// latest stage when `source` is absent.
    pub fn append_output(
        &mut self,
        name: &str,
        path: impl AsRef<Path>,
        source: Option<NodeId>,
    ) -> Result<NodeId, ConstructionError> {
        let source = match source {
            Some(source) => source,
            None => self
                .get_terminals()
                .into_iter()
                .rev()
                .max_by_key(|id| self.nodes[id.index()].class.stage)
                .ok_or(ConstructionError::NoTerminal)?,
        };
        self.check_id(source)?;

        let path = path.as_ref().to_string_lossy().to_string();
        let params: Params = [("path", path)].into_iter().collect();
        let id = self.add_node(FILE_OUT_TYPE, name, params)?;
        self.set_input(id, 0, source)?;

        Ok(id)
    }

    pub fn validate(&self, id: NodeId) -> Vec<ValidationIssue> {
        let Some(node) = self.nodes.get(id.index()) else {
            return vec![];
        };
        // ignored nodes never compute, their parameters are not checked
        let mut issues = if node.ignored {
            vec![]
        } else {
            node.params.validate(&node.name, &node.class.params)
        };

        for (slot, binding) in node.inputs.iter().enumerate() {
            let Some(binding) = binding else {
                issues.push(ValidationIssue::MissingInput {
                    node: node.name.clone(),
                    slot,
                });
                continue;
            };

            let upstream = &self.nodes[binding.source.index()];
            let expected = node.class.input_type(slot);
            let found = upstream.class.output_type;
            if !expected.accepts(found) {
                issues.push(ValidationIssue::InputType {
                    node: node.name.clone(),
                    slot,
                    upstream: upstream.name.clone(),
                    expected,
                    found,
                });
            }
        }

        issues
    }

    /// Validation issues of every node that has any, keyed by node name.
    pub fn validate_all(&self) -> BTreeMap<String, Vec<ValidationIssue>> {
        self.nodes
            .iter()
            .map(|node| (node.name.clone(), self.validate(node.id)))
            .filter(|(_, issues)| !issues.is_empty())
            .collect()
    }

    pub fn stats(&self) -> EvalStats {
        self.stats
    }
    pub fn reset_stats(&mut self) {
        self.stats = EvalStats::default();
    }

    fn insert(&mut self, mut node: Node) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        node.id = id;
        self.by_name.insert(node.name.clone(), id);
        self.nodes.push(node);
        self.dependents.push(vec![]);
        id
    }

    fn check_id(&self, id: NodeId) -> Result<&Node, ConstructionError> {
        self.nodes
            .get(id.index())
            .ok_or_else(|| ConstructionError::UnknownNode(id.to_string()))
    }

    /// Whether `target` is `from` or lies upstream of it.
    fn depends_on(&self, from: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.nodes.len()];
        let mut stack = vec![from.index()];

        while let Some(node_idx) = stack.pop() {
            if node_idx == target.index() {
                return true;
            }
            if seen[node_idx] {
                continue;
            }
            seen[node_idx] = true;

            stack.extend(
                self.nodes[node_idx]
                    .inputs
                    .iter()
                    .flatten()
                    .map(|binding| binding.source.index()),
            );
        }

        false
    }

    fn check_acyclic(&self) -> Result<(), ConstructionError> {
        let mut states = vec![ProcessState::None; self.nodes.len()];
        let mut stack: Vec<Visit> = Vec::new();

        for start_idx in 0..self.nodes.len() {
            if states[start_idx] != ProcessState::None {
                continue;
            }
            stack.push(Visit {
                node_idx: start_idx,
                cause: VisitCause::Enter,
            });

            while let Some(visit) = stack.pop() {
                if let VisitCause::Done = visit.cause {
                    debug_assert_eq!(states[visit.node_idx], ProcessState::Processing);
                    states[visit.node_idx] = ProcessState::Done;
                    continue;
                }

                match states[visit.node_idx] {
                    ProcessState::Processing => {
                        return Err(ConstructionError::CycleDetected {
                            node: self.nodes[visit.node_idx].name.clone(),
                        });
                    }
                    ProcessState::Done => continue,
                    ProcessState::None => {}
                }

                states[visit.node_idx] = ProcessState::Processing;
                stack.push(Visit {
                    node_idx: visit.node_idx,
                    cause: VisitCause::Done,
                });
                for binding in self.nodes[visit.node_idx].inputs.iter().flatten() {
                    stack.push(Visit {
                        node_idx: binding.source.index(),
                        cause: VisitCause::Enter,
                    });
                }
            }
        }

        Ok(())
    }

    pub(crate) fn invalidate_recursively<I>(&mut self, node_ids: I)
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut stack: Vec<usize> = node_ids.into_iter().map(|id| id.index()).collect();
        let mut seen: Vec<bool> = vec![false; self.nodes.len()];

        while let Some(node_idx) = stack.pop() {
            if seen[node_idx] {
                continue;
            }
            seen[node_idx] = true;

            self.nodes[node_idx].invalidate();
            stack.extend(
                self.dependents[node_idx]
                    .iter()
                    .map(|dependent| dependent.index())
                    .filter(|dependent_idx| !seen[*dependent_idx]),
            );
        }
    }
}
