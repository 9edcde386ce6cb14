//! Routing decisions for the QA pipeline.
//!
//! Every router is a pure function of the run state. Gate routers inspect one
//! boolean field and either continue to the next node or end the run; a gate
//! that was never written counts as closed.

use std::collections::BTreeMap;

use super::types::{Next, NodeName, RunState};

/// A routing function invoked after the node it is registered for.
pub type Router = fn(&RunState) -> Next;

/// Table of routers keyed by the node they follow.
#[derive(Debug, Clone, Default)]
pub struct RouterTable {
    routers: BTreeMap<NodeName, Router>,
}

impl RouterTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routers for the linear QA chain with boolean short-circuits.
    pub fn qa_pipeline() -> Self {
        let mut table = Self::new();
        table.register(NodeName::IntentCheck, after_intent_check);
        table.register(NodeName::TargetExistenceCheck, after_target_check);
        table.register(NodeName::CaptureState, after_capture);
        table.register(NodeName::FeasibilityCheck, after_feasibility_check);
        table.register(NodeName::QueryRefinement, after_query_refinement);
        table.register(NodeName::ExecuteTask, after_execute_task);
        table
    }

    /// Register (or replace) the router following `node`.
    pub fn register(&mut self, node: NodeName, router: Router) {
        self.routers.insert(node, router);
    }

    pub fn get(&self, node: NodeName) -> Option<Router> {
        self.routers.get(&node).copied()
    }

    pub fn contains(&self, node: NodeName) -> bool {
        self.routers.contains_key(&node)
    }
}

fn gate(flag: Option<bool>, next: NodeName) -> Next {
    if flag == Some(true) {
        Next::Node(next)
    } else {
        Next::Terminal
    }
}

pub fn after_intent_check(state: &RunState) -> Next {
    gate(state.intent_ok, NodeName::TargetExistenceCheck)
}

pub fn after_target_check(state: &RunState) -> Next {
    gate(state.target_ok, NodeName::CaptureState)
}

pub fn after_capture(state: &RunState) -> Next {
    gate(state.capture_ok, NodeName::FeasibilityCheck)
}

pub fn after_feasibility_check(state: &RunState) -> Next {
    gate(state.feasible, NodeName::QueryRefinement)
}

pub fn after_query_refinement(_state: &RunState) -> Next {
    Next::Node(NodeName::ExecuteTask)
}

pub fn after_execute_task(_state: &RunState) -> Next {
    Next::Terminal
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_gates(gates: [Option<bool>; 4]) -> RunState {
        RunState {
            intent_ok: gates[0],
            target_ok: gates[1],
            capture_ok: gates[2],
            feasible: gates[3],
            ..RunState::new("q", "https://example.com")
        }
    }

    /// Exhaustively checks every gate combination (unset, false, true) against
    /// every router, including routers that ignore gates.
    #[test]
    fn routers_only_return_documented_targets() {
        let values = [None, Some(false), Some(true)];
        let table = RouterTable::qa_pipeline();

        for a in values {
            for b in values {
                for c in values {
                    for d in values {
                        let state = state_with_gates([a, b, c, d]);
                        let expect = |flag: Option<bool>, next: NodeName| {
                            if flag == Some(true) {
                                Next::Node(next)
                            } else {
                                Next::Terminal
                            }
                        };
                        let route = |node| table.get(node).expect("router")(&state);

                        assert_eq!(
                            route(NodeName::IntentCheck),
                            expect(a, NodeName::TargetExistenceCheck)
                        );
                        assert_eq!(
                            route(NodeName::TargetExistenceCheck),
                            expect(b, NodeName::CaptureState)
                        );
                        assert_eq!(
                            route(NodeName::CaptureState),
                            expect(c, NodeName::FeasibilityCheck)
                        );
                        assert_eq!(
                            route(NodeName::FeasibilityCheck),
                            expect(d, NodeName::QueryRefinement)
                        );
                        assert_eq!(
                            route(NodeName::QueryRefinement),
                            Next::Node(NodeName::ExecuteTask)
                        );
                        assert_eq!(route(NodeName::ExecuteTask), Next::Terminal);
                    }
                }
            }
        }
    }

    #[test]
    fn qa_pipeline_table_covers_every_node() {
        let table = RouterTable::qa_pipeline();
        for node in NodeName::ALL {
            assert!(table.contains(node), "missing router for {node}");
        }
    }

    #[test]
    fn register_replaces_existing_router() {
        let mut table = RouterTable::qa_pipeline();
        table.register(NodeName::QueryRefinement, |_| Next::Terminal);
        let router = table.get(NodeName::QueryRefinement).expect("router");
        assert_eq!(router(&RunState::default()), Next::Terminal);
    }
}
