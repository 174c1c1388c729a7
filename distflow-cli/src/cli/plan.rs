// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Plan files: the per-node fragments of one distributed query

use distflow::flow::ProcessorSpec;
use distflow::rpc::EvalContextParams;
use distflow::txn::TxnDescriptor;
use distflow::{FlowError, FlowId, FlowSpec, NodeId, SetupFlowRequest};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

fn default_gateway() -> NodeId {
    NodeId(1)
}

/// A plan as read from disk
#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    /// Node whose fragment answers over the sync flow RPC
    #[serde(default = "default_gateway")]
    pub gateway: NodeId,
    #[serde(default)]
    pub eval_context: EvalContextParams,
    pub fragments: Vec<Fragment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Fragment {
    pub node: NodeId,
    pub processors: Vec<ProcessorSpec>,
}

/// Setup requests for every fragment of one run of a plan
#[derive(Debug)]
pub struct PlanRequests {
    pub gateway: (NodeId, SetupFlowRequest),
    pub remote: Vec<(NodeId, SetupFlowRequest)>,
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| FlowError::Config(format!("reading {}: {}", path.display(), e)))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, FlowError> {
        let plan: Plan = serde_json::from_str(raw)
            .map_err(|e| FlowError::Config(format!("invalid plan: {}", e)))?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), FlowError> {
        let mut seen = HashSet::new();
        for fragment in &self.fragments {
            if !fragment.node.is_set() {
                return Err(FlowError::Config("fragment on node 0".to_string()));
            }
            if !seen.insert(fragment.node) {
                return Err(FlowError::Config(format!(
                    "more than one fragment for {}",
                    fragment.node
                )));
            }
        }
        if !seen.contains(&self.gateway) {
            return Err(FlowError::Config(format!(
                "no fragment for gateway {}",
                self.gateway
            )));
        }
        Ok(())
    }

    /// Highest node id any fragment runs on
    pub fn max_node(&self) -> usize {
        self.fragments
            .iter()
            .map(|f| f.node.0 as usize)
            .max()
            .unwrap_or(1)
    }

    /// Build the setup requests of one run; all fragments share `flow_id`
    pub fn requests(
        &self,
        flow_id: FlowId,
        txn: &TxnDescriptor,
    ) -> Result<PlanRequests, FlowError> {
        let mut gateway = None;
        let mut remote = Vec::new();
        for fragment in &self.fragments {
            let req = SetupFlowRequest::new(
                txn.clone(),
                self.eval_context.clone(),
                FlowSpec {
                    flow_id,
                    processors: fragment.processors.clone(),
                },
            );
            if fragment.node == self.gateway {
                gateway = Some((fragment.node, req));
            } else {
                remote.push((fragment.node, req));
            }
        }
        let gateway = gateway.ok_or_else(|| {
            FlowError::Config(format!("no fragment for gateway {}", self.gateway))
        })?;
        Ok(PlanRequests { gateway, remote })
    }
}
