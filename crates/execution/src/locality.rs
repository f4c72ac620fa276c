use std::sync::atomic::{AtomicUsize, Ordering};

use sluice_core::OutputLocality;

use crate::substrate::PlacementHint;

/// Per-operator source of placement hints, derived from
/// [`OutputLocality`]. Each operator owns its own selector, so round-robin
/// cursors never interfere across operators.
#[derive(Debug, Default)]
pub enum PlacementSelector {
    /// No preference: the operator uses its own default placement.
    #[default]
    Disabled,
    /// Every task goes to one node.
    Pinned(String),
    /// Tasks rotate across nodes.
    RoundRobin {
        nodes: Vec<String>,
        cursor: AtomicUsize,
    },
}

impl PlacementSelector {
    pub fn from_options(locality: &OutputLocality, current_node: &str) -> Self {
        match locality {
            OutputLocality::Disabled => PlacementSelector::Disabled,
            OutputLocality::CurrentNode => PlacementSelector::Pinned(current_node.to_string()),
            OutputLocality::Nodes(nodes) if nodes.is_empty() => {
                PlacementSelector::Pinned(current_node.to_string())
            }
            OutputLocality::Nodes(nodes) => PlacementSelector::RoundRobin {
                nodes: nodes.clone(),
                cursor: AtomicUsize::new(0),
            },
        }
    }

    /// Hint for the next task, or `None` when locality is disabled.
    pub fn next_hint(&self) -> Option<PlacementHint> {
        match self {
            PlacementSelector::Disabled => None,
            PlacementSelector::Pinned(node) => Some(PlacementHint::Node(node.clone())),
            PlacementSelector::RoundRobin { nodes, cursor } => {
                let i = cursor.fetch_add(1, Ordering::Relaxed);
                nodes
                    .get(i % nodes.len())
                    .map(|node| PlacementHint::Node(node.clone()))
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, PlacementSelector::Disabled)
    }
}
