use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::Cache;
use crate::data::Value;
use crate::error::{ConstructionError, EvalError, EvalResult, ValidationErrors};
use crate::fingerprint::Fingerprint;
use crate::node::{ComputeArgs, NodeId, NodeState, NullData, ResultOrigin};
use crate::script::Script;

/// Counters of how node results were obtained since the last reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EvalStats {
    pub computed: usize,
    pub cache_hits: usize,
    pub memo_hits: usize,
}

impl Script {
    /// Evaluates a node, pulling every input it transitively depends on.
    ///
    /// Clean nodes return their memoized artifact. Dirty nodes are validated,
    /// then looked up in `cache` by fingerprint, and only computed on a miss.
    /// Cache failures are logged and never fail the evaluation.
    pub fn eval(&mut self, id: NodeId, cache: &dyn Cache) -> EvalResult<Arc<Value>> {
        if self.nodes.get(id.index()).is_none() {
            return Err(ConstructionError::UnknownNode(id.to_string()).into());
        }

        let start = Instant::now();
        let (artifact, _) = self.eval_node(id, cache)?;
        debug!(
            "Evaluated {} in {:.3}s",
            self.nodes[id.index()].name,
            start.elapsed().as_secs_f64()
        );

        Ok(artifact)
    }

    pub fn eval_by_name(&mut self, name: &str, cache: &dyn Cache) -> EvalResult<Arc<Value>> {
        let id = self
            .node_id(name)
            .ok_or_else(|| ConstructionError::UnknownNode(name.to_string()))?;
        self.eval(id, cache)
    }

    /// Evaluates every terminal in insertion order, stopping at the first
    /// failure.
    pub fn eval_terminals(&mut self, cache: &dyn Cache) -> EvalResult<Vec<(NodeId, Arc<Value>)>> {
        let terminals = self.get_terminals();
        let mut results = Vec::with_capacity(terminals.len());
        for id in terminals {
            results.push((id, self.eval(id, cache)?));
        }

        info!(
            "Evaluated {} terminals: {} computed, {} from cache, {} memoized",
            results.len(),
            self.stats.computed,
            self.stats.cache_hits,
            self.stats.memo_hits
        );

        Ok(results)
    }

    fn eval_node(&mut self, id: NodeId, cache: &dyn Cache) -> EvalResult<(Arc<Value>, Fingerprint)> {
        let node = &self.nodes[id.index()];

        if let NodeState::Valid {
            artifact,
            fingerprint,
            ..
        } = &node.state
        {
            let result = (artifact.clone(), *fingerprint);
            self.stats.memo_hits += 1;
            return Ok(result);
        }

        let wired = node.inputs.iter().flatten().count();
        if wired != node.inputs.len() || !node.class.arity.admits(wired) {
            return Err(ConstructionError::Arity {
                node: node.name.clone(),
                expected: node.class.arity,
                found: wired,
            }
            .into());
        }

        let issues = self.validate(id);
        if !issues.is_empty() {
            let node = &mut self.nodes[id.index()];
            node.state = NodeState::ValidationFailed;
            info!("Node {} failed validation with {} issues", node.name, issues.len());
            return Err(EvalError::Validation(ValidationErrors {
                node: node.name.clone(),
                issues,
            }));
        }

        let sources: Vec<NodeId> = node
            .inputs
            .iter()
            .flatten()
            .map(|binding| binding.source)
            .collect();
        let mut input_values: Vec<Arc<Value>> = Vec::with_capacity(sources.len());
        let mut input_fingerprints: Vec<Fingerprint> = Vec::with_capacity(sources.len());
        for source in sources {
            let (value, fingerprint) = self.eval_node(source, cache)?;
            input_values.push(value);
            input_fingerprints.push(fingerprint);
        }

        let node = &self.nodes[id.index()];
        let class = node.class.clone();
        let name = node.name.clone();
        let params = node.resolved_params();
        let fingerprint =
            Fingerprint::compute(&class.type_name(), &params, node.ignored, &input_fingerprints);

        if node.ignored {
            let artifact = match &class.null_data {
                NullData::FirstInput => input_values
                    .first()
                    .cloned()
                    .unwrap_or_else(|| Arc::new(Value::Null)),
                NullData::Value(value) => Arc::new(value.clone()),
            };
            debug!("Node {} is ignored, passing null data through", name);
            self.store(id, artifact.clone(), fingerprint, ResultOrigin::Ignored);
            return Ok((artifact, fingerprint));
        }

        if class.cacheable {
            match cache.get(&fingerprint) {
                Ok(Some(artifact)) => {
                    debug!("Cache hit for {} ({})", name, fingerprint);
                    self.stats.cache_hits += 1;
                    self.store(id, artifact.clone(), fingerprint, ResultOrigin::CacheHit);
                    return Ok((artifact, fingerprint));
                }
                Ok(None) => {}
                Err(err) => warn!("Cache read failed for {}, recomputing: {}", name, err),
            }
        }

        let start = Instant::now();
        let result = class
            .lambda
            .invoke(&ComputeArgs {
                node: &name,
                params: &params,
                inputs: &input_values,
            })
            .and_then(|value| {
                if class.output_type.admits(&value) {
                    Ok(value)
                } else {
                    Err(anyhow::anyhow!(
                        "produced a {} value, declared output type is {}",
                        value.kind(),
                        class.output_type
                    ))
                }
            });

        let artifact = match result {
            Ok(value) => Arc::new(value),
            Err(source) => {
                self.nodes[id.index()].state = NodeState::ComputeFailed;
                warn!("Computation failed at node {}: {:#}", name, source);
                return Err(EvalError::Compute { node: name, source });
            }
        };

        debug!(
            "Computed {} in {:.3}s ({})",
            name,
            start.elapsed().as_secs_f64(),
            fingerprint
        );

        if class.cacheable {
            if let Err(err) = cache.put(&fingerprint, &artifact) {
                warn!("Cache write failed for {}: {}", name, err);
            }
        }

        self.stats.computed += 1;
        self.store(id, artifact.clone(), fingerprint, ResultOrigin::Computed);

        Ok((artifact, fingerprint))
    }

    fn store(
        &mut self,
        id: NodeId,
        artifact: Arc<Value>,
        fingerprint: Fingerprint,
        origin: ResultOrigin,
    ) {
        self.nodes[id.index()].state = NodeState::Valid {
            artifact,
            fingerprint,
            origin,
        };
    }
}
