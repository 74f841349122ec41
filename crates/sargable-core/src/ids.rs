//! Per-planning-session generator of fresh projection names and plan node ids.
//!
//! One generator is owned by one planning attempt and passed by `&mut` into every stage
//! that needs fresh names, so the pipeline stays free of global state.

use crate::plan::NodeId;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct IdGenerator {
    counters: HashMap<String, u64>,
    next_node: u32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next name for `key`: `key_0`, `key_1`, ...
    pub fn next_name(&mut self, key: &str) -> String {
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        let name = format!("{}_{}", key, counter);
        *counter += 1;
        name
    }

    pub fn next_node_id(&mut self) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_counted_per_key() {
        let mut ids = IdGenerator::new();
        assert_eq!(ids.next_name("rid"), "rid_0");
        assert_eq!(ids.next_name("rid"), "rid_1");
        assert_eq!(ids.next_name("evalTemp"), "evalTemp_0");
        assert_eq!(ids.next_node_id(), NodeId(0));
        assert_eq!(ids.next_node_id(), NodeId(1));
    }
}
