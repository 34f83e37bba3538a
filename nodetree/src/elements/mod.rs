use crate::registry::NodeModule;

pub mod test_nodes;
pub mod utils;

/// Modules shipped with the engine, in registration order.
pub fn builtin_modules() -> Vec<NodeModule> {
    vec![utils::module(), test_nodes::module()]
}
