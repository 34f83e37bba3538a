pub mod cache;
pub mod config;
pub mod data;
pub mod descriptor;
pub mod elements;
pub mod error;
pub mod eval;
pub mod file_cache;
pub mod fingerprint;
pub mod node;
pub mod param;
pub mod registry;
pub mod script;

#[cfg(test)]
mod tests;

pub mod prelude {
    pub use crate::cache::{Cache, CacheError, CacheStats, MemoryCache, NullCache};
    pub use crate::config::{CacheConfig, CacheKind, EngineConfig};
    pub use crate::data::{DataType, ParamValue, Value};
    pub use crate::descriptor::NodeDescriptor;
    pub use crate::error::{
        ConstructionError, EvalError, EvalResult, RegistryError, ValidationErrors,
        ValidationIssue,
    };
    pub use crate::eval::EvalStats;
    pub use crate::file_cache::FileCache;
    pub use crate::fingerprint::Fingerprint;
    pub use crate::node::{
        Arity, ComputeArgs, Node, NodeClass, NodeId, NodeLambda, NodeState, NullData,
        ResultOrigin, Stage,
    };
    pub use crate::param::{ParamDef, ParamDomain, Params};
    pub use crate::registry::{NodeModule, Registry};
    pub use crate::script::Script;
}
