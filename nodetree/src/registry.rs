use std::sync::Arc;

use hashbrown::hash_map::Entry;
use hashbrown::HashMap;
use tracing::debug;

use crate::elements;
use crate::error::RegistryError;
use crate::node::{Node, NodeClass, Stage};
use crate::param::Params;

/// A named group of node classes, registered as a unit.
#[derive(Clone, Debug, Default)]
pub struct NodeModule {
    pub group: String,
    pub classes: Vec<NodeClass>,
}

/// Maps type names to node classes.
///
/// Classes are keyed by their namespaced `Group::Name`. A lookup that does
/// not match exactly falls back to the unqualified name, which must then be
/// unique across modules.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    classes: HashMap<String, Arc<NodeClass>>,
    by_short_name: HashMap<String, Vec<String>>,
    modules: Vec<String>,
}

impl NodeModule {
    pub fn new(group: &str) -> Self {
        NodeModule {
            group: group.to_string(),
            classes: vec![],
        }
    }

    pub fn with(mut self, mut class: NodeClass) -> Self {
        class.group = self.group.clone();
        self.classes.push(class);
        self
    }
}

impl Registry {
    /// Registry holding every built-in module.
    pub fn builtin() -> Self {
        let mut registry = Registry::default();
        for module in elements::builtin_modules() {
            registry
                .register_module(module)
                .expect("built-in modules have unique type names");
        }
        registry
    }

    /// Registry holding the named built-in modules only.
    pub fn with_modules<I, S>(names: I) -> Result<Self, RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut available = elements::builtin_modules();
        let mut registry = Registry::default();

        for name in names {
            let name = name.as_ref();
            let position = available
                .iter()
                .position(|module| module.group.eq_ignore_ascii_case(name))
                .ok_or_else(|| RegistryError::UnknownModule(name.to_string()))?;
            registry.register_module(available.swap_remove(position))?;
        }

        Ok(registry)
    }

    pub fn register_module(&mut self, module: NodeModule) -> Result<(), RegistryError> {
        debug!(
            "Registering module {} with {} node types",
            module.group,
            module.classes.len()
        );

        for class in module.classes {
            self.register(class)?;
        }
        self.modules.push(module.group);

        Ok(())
    }

    pub fn register(&mut self, class: NodeClass) -> Result<(), RegistryError> {
        let type_name = class.type_name();
        match self.classes.entry(type_name.clone()) {
            Entry::Occupied(_) => return Err(RegistryError::DuplicateType(type_name)),
            Entry::Vacant(entry) => {
                entry.insert(Arc::new(class.clone()));
            }
        }
        self.by_short_name
            .entry(class.name)
            .or_default()
            .push(type_name);

        Ok(())
    }

    pub fn resolve(&self, type_name: &str) -> Result<Arc<NodeClass>, RegistryError> {
        if let Some(class) = self.classes.get(type_name) {
            return Ok(class.clone());
        }

        let short_name = short_name(type_name);
        match self.by_short_name.get(short_name).map(Vec::as_slice) {
            Some([single]) => Ok(self.classes[single].clone()),
            Some(candidates) if !candidates.is_empty() => {
                let mut candidates = candidates.to_vec();
                candidates.sort();
                Err(RegistryError::AmbiguousType {
                    type_name: type_name.to_string(),
                    candidates,
                })
            }
            _ => Err(RegistryError::UnknownType(type_name.to_string())),
        }
    }

    pub fn get_new_node(
        &self,
        type_name: &str,
        name: &str,
        params: Params,
    ) -> Result<Node, RegistryError> {
        let class = self.resolve(type_name)?;
        Ok(Node::new(name, class, params))
    }

    /// Classes whose stage is in `stages`, or every class when `stages` is
    /// empty, ordered by type name.
    pub fn get_nodes(&self, stages: &[Stage]) -> Vec<Arc<NodeClass>> {
        let mut classes: Vec<Arc<NodeClass>> = self
            .classes
            .values()
            .filter(|class| stages.is_empty() || stages.contains(&class.stage))
            .cloned()
            .collect();
        classes.sort_by_key(|class| class.type_name());
        classes
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }
    pub fn len(&self) -> usize {
        self.classes.len()
    }
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn short_name(type_name: &str) -> &str {
    let name = type_name.rsplit("::").next().unwrap_or(type_name);
    name.rsplit('.').next().unwrap_or(name)
}
