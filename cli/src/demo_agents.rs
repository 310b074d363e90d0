// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bundled demo agents
//!
//! Deterministic stand-ins for the business agents the built-in workflows
//! call. They compute their answers from the task payload alone, so a
//! workflow run on the same input always produces the same step results.
//!
//! | Agent id                | Handles                                        |
//! |-------------------------|------------------------------------------------|
//! | `expense_approval`      | approve expenses under a limit                 |
//! | `contract_analysis`     | contract risk scan, document verification      |
//! | `report_generation`     | summarise a task into report sections          |
//! | `procurement_assistant` | vendor setup, budget updates, contract checks  |

use async_trait::async_trait;
use concord_core::application::registry::AgentRegistry;
use concord_core::domain::agent::{AgentCategory, AgentConfig, AgentWorker};
use concord_core::domain::message::Payload;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub const EXPENSE_APPROVAL: &str = "expense_approval";
pub const CONTRACT_ANALYSIS: &str = "contract_analysis";
pub const REPORT_GENERATION: &str = "report_generation";
pub const PROCUREMENT_ASSISTANT: &str = "procurement_assistant";

const DEFAULT_APPROVAL_LIMIT: f64 = 1000.0;

/// Contract terms that raise the risk score when present.
const RISK_TERMS: [&str; 5] = [
    "penalty",
    "indemnify",
    "exclusive",
    "auto-renew",
    "unlimited liability",
];

/// Base configuration for every demo agent. Config file overrides are
/// layered on top of these.
pub fn demo_agent_configs() -> Vec<AgentConfig> {
    let config = |id: &str, title: &str, category: AgentCategory, capabilities: &[&str]| AgentConfig {
        agent_id: id.to_string(),
        title: title.to_string(),
        category,
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        settings: Payload::new(),
    };

    let mut expense = config(
        EXPENSE_APPROVAL,
        "Expense Approval",
        AgentCategory::FinancialAutomation,
        &["process_expense", "approve_expense"],
    );
    expense
        .settings
        .insert("approval_limit".to_string(), json!(DEFAULT_APPROVAL_LIMIT));

    vec![
        expense,
        config(
            CONTRACT_ANALYSIS,
            "Contract Analysis",
            AgentCategory::DocumentProcessing,
            &["full_analysis", "document_verification"],
        ),
        config(
            REPORT_GENERATION,
            "Report Generation",
            AgentCategory::BusinessIntelligence,
            &["generate_report"],
        ),
        config(
            PROCUREMENT_ASSISTANT,
            "Procurement Assistant",
            AgentCategory::WorkflowOrchestration,
            &["setup_vendor", "update_budget", "validate_contract"],
        ),
    ]
}

/// Register a factory for every demo agent.
pub fn register_demo_agents(registry: &AgentRegistry) {
    registry.register(EXPENSE_APPROVAL, |config| {
        Ok(Arc::new(ExpenseApproval::from_config(config)?) as Arc<dyn AgentWorker>)
    });
    registry.register(CONTRACT_ANALYSIS, |_| {
        Ok(Arc::new(ContractAnalysis) as Arc<dyn AgentWorker>)
    });
    registry.register(REPORT_GENERATION, |_| {
        Ok(Arc::new(ReportGeneration) as Arc<dyn AgentWorker>)
    });
    registry.register(PROCUREMENT_ASSISTANT, |_| {
        Ok(Arc::new(ProcurementAssistant) as Arc<dyn AgentWorker>)
    });
}

fn task_type<'a>(input: &'a Payload, default: &'a str) -> &'a str {
    input.get("type").and_then(Value::as_str).unwrap_or(default)
}

/// Stable id derived from the content it describes.
fn content_id(prefix: &str, content: &Value) -> String {
    let id = Uuid::new_v5(&Uuid::NAMESPACE_OID, content.to_string().as_bytes());
    format!("{}-{}", prefix, &id.simple().to_string()[..8])
}

// ============================================================================
// Expense approval
// ============================================================================

pub struct ExpenseApproval {
    approval_limit: f64,
}

impl ExpenseApproval {
    pub fn from_config(config: &AgentConfig) -> anyhow::Result<Self> {
        let approval_limit = match config.settings.get("approval_limit") {
            None => DEFAULT_APPROVAL_LIMIT,
            Some(value) => value.as_f64().ok_or_else(|| {
                anyhow::anyhow!("approval_limit must be a number, got {}", value)
            })?,
        };
        Ok(Self { approval_limit })
    }

    /// Used when the task carries no expenses of its own.
    fn sample_batch() -> Vec<Value> {
        vec![
            json!({ "id": "EXP-001", "description": "Client dinner", "amount": 240.0 }),
            json!({ "id": "EXP-002", "description": "Conference pass", "amount": 899.0 }),
            json!({ "id": "EXP-003", "description": "Workstation", "amount": 2350.0 }),
        ]
    }
}

#[async_trait]
impl AgentWorker for ExpenseApproval {
    fn validate_input(&self, input: &Payload) -> bool {
        input.get("expenses").is_none_or(Value::is_array)
    }

    async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
        let expenses = match input.get("expenses") {
            Some(Value::Array(items)) => items.clone(),
            _ => Self::sample_batch(),
        };

        let mut approved = Vec::new();
        let mut rejected = Vec::new();
        let mut total_approved = 0.0;
        for expense in expenses {
            let amount = expense.get("amount").and_then(Value::as_f64).unwrap_or(0.0);
            if amount > 0.0 && amount <= self.approval_limit {
                total_approved += amount;
                approved.push(expense);
            } else {
                let reason = if amount <= 0.0 {
                    "missing amount"
                } else {
                    "over approval limit"
                };
                rejected.push(json!({ "expense": expense, "reason": reason }));
            }
        }

        Ok(payload(json!({
            "approved_count": approved.len(),
            "rejected_count": rejected.len(),
            "total_approved": total_approved,
            "approval_limit": self.approval_limit,
            "approved": approved,
            "rejected": rejected,
        })))
    }
}

// ============================================================================
// Contract analysis
// ============================================================================

pub struct ContractAnalysis;

impl ContractAnalysis {
    fn analyze(input: &Payload) -> Payload {
        let text = input
            .get("contract_text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_lowercase();
        let flagged: Vec<&str> = RISK_TERMS
            .iter()
            .copied()
            .filter(|term| text.contains(term))
            .collect();
        let risk_level = match flagged.len() {
            0 => "low",
            1 | 2 => "medium",
            _ => "high",
        };

        let mut result = payload(json!({
            "analysis_type": "full_analysis",
            "risk_level": risk_level,
            "flagged_terms": flagged,
        }));
        let with_assessment = input
            .get("include_risk_assessment")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if with_assessment {
            result.insert(
                "risk_assessment".to_string(),
                json!({
                    "score": flagged.len() * 25,
                    "requires_legal_review": risk_level == "high",
                }),
            );
        }
        result
    }

    fn verify_documents(input: &Payload) -> Payload {
        let documents = match input.get("documents") {
            Some(Value::Array(items)) => items.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(single) => vec![single.clone()],
        };
        payload(json!({
            "analysis_type": "document_verification",
            "verified": !documents.is_empty(),
            "documents_checked": documents.len(),
            "customer_ref": content_id("CUST", &Value::Array(documents)),
        }))
    }
}

#[async_trait]
impl AgentWorker for ContractAnalysis {
    async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
        Ok(match task_type(&input, "full_analysis") {
            "document_verification" => Self::verify_documents(&input),
            _ => Self::analyze(&input),
        })
    }
}

// ============================================================================
// Report generation
// ============================================================================

pub struct ReportGeneration;

#[async_trait]
impl AgentWorker for ReportGeneration {
    async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
        let template_id = input
            .get("template_id")
            .and_then(Value::as_str)
            .unwrap_or("generic");
        let sections: Vec<&String> = input
            .keys()
            .filter(|k| !matches!(k.as_str(), "type" | "template_id" | "_metadata"))
            .collect();

        Ok(payload(json!({
            "report_id": content_id("RPT", &Value::Object(input.clone())),
            "template_id": template_id,
            "title": template_id.replace('_', " "),
            "sections": sections,
            "status": "generated",
        })))
    }
}

// ============================================================================
// Procurement assistant
// ============================================================================

pub struct ProcurementAssistant;

#[async_trait]
impl AgentWorker for ProcurementAssistant {
    fn validate_input(&self, input: &Payload) -> bool {
        input.get("type").is_some_and(Value::is_string)
    }

    async fn process(&self, input: Payload) -> anyhow::Result<Payload> {
        let action = task_type(&input, "");
        let result = match action {
            "setup_vendor" => {
                let customer = input.get("customer_info").cloned().unwrap_or(Value::Null);
                json!({
                    "action": action,
                    "vendor_id": content_id("VND", &customer),
                    "status": "created",
                })
            }
            "update_budget" => {
                let committed = input
                    .get("expense_data")
                    .and_then(|d| d.get("total_approved"))
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0);
                json!({
                    "action": action,
                    "budget_updated": true,
                    "amount_committed": committed,
                })
            }
            "validate_contract" => {
                let risk = input
                    .get("contract_data")
                    .and_then(|d| d.get("risk_level"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown");
                json!({
                    "action": action,
                    "compliant": risk == "low" || risk == "medium",
                    "risk_level": risk,
                })
            }
            other => anyhow::bail!("unsupported procurement action '{}'", other),
        };
        Ok(payload(result))
    }
}

fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => {
            let mut map = Payload::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}
