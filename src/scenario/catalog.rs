// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The named HA scenarios and their test-management tags.

use super::{Fault, TargetSelector};

/// A named scenario: which nodes to fault and how.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioSpec {
    pub name: &'static str,
    /// Identifier of the test case in the test-management system.
    pub tag: &'static str,
    pub description: &'static str,
    pub selector: TargetSelector,
    pub fault: Fault,
}

impl ScenarioSpec {
    /// Fix the seed of a randomly targeted scenario. No effect on the others.
    pub fn with_seed(mut self, seed: u64) -> Self {
        if let TargetSelector::RandomRepeated { loop_count, .. } = self.selector {
            self.selector = TargetSelector::RandomRepeated {
                loop_count,
                seed: Some(seed),
            };
        }
        self
    }

    /// Fault only the node at `index`, once.
    pub fn on_node(mut self, index: usize) -> Self {
        self.selector = TargetSelector::Only(index);
        self
    }

    pub fn with_loop_count(mut self, loop_count: u32) -> Self {
        if let TargetSelector::RandomRepeated { seed, .. } = self.selector {
            self.selector = TargetSelector::RandomRepeated { loop_count, seed };
        }
        self
    }
}

/// Every scenario, with randomly targeted ones repeating `loop_count` times.
pub fn all(loop_count: u32) -> Vec<ScenarioSpec> {
    let repeated = TargetSelector::RandomRepeated {
        loop_count,
        seed: None,
    };
    vec![
        ScenarioSpec {
            name: "one_by_one_safe",
            tag: "TEST-22544",
            description: "Safely shut down each node in turn and power it back on",
            selector: TargetSelector::AllInOrder,
            fault: Fault::PowerOff { safe: true },
        },
        ScenarioSpec {
            name: "one_by_one_unsafe",
            tag: "TEST-22574",
            description: "Cut power to each node in turn through its BMC and power it back on",
            selector: TargetSelector::AllInOrder,
            fault: Fault::PowerOff { safe: false },
        },
        ScenarioSpec {
            name: "one_by_one_nw_down",
            tag: "TEST-23274",
            description: "Take each node's private data interface down in turn and bring it back",
            selector: TargetSelector::AllInOrder,
            fault: Fault::InterfaceDown,
        },
        ScenarioSpec {
            name: "single_node_multiple_times_safe",
            tag: "TEST-22623",
            description: "Safely shut down one random node repeatedly",
            selector: repeated,
            fault: Fault::PowerOff { safe: true },
        },
        ScenarioSpec {
            name: "single_node_multiple_times_unsafe",
            tag: "TEST-22626",
            description: "Cut power to one random node repeatedly",
            selector: repeated,
            fault: Fault::PowerOff { safe: false },
        },
    ]
}

/// Look a scenario up by name or tag.
pub fn find(name: &str, loop_count: u32) -> Option<ScenarioSpec> {
    all(loop_count)
        .into_iter()
        .find(|s| s.name == name || s.tag == name)
}
