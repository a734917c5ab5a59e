//! Handler implementations for mcp-doctor tools

use rmcp::model::{CallToolResult, Content};
use rmcp::ErrorData as McpError;
use serde::Serialize;

use crate::advisor::{merge_report, AdvisorSummary};
use crate::error::DoctorError;
use crate::params::*;
use crate::server::McpDoctorServer;
use crate::types::{ErrorRecord, FixId, McpServer, RepairPlan};

// ============================================================================
// Helper Functions
// ============================================================================

pub(crate) fn json_success<T: Serialize>(data: &T) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(data).map_err(|e| internal_error(e.to_string()))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

pub(crate) fn internal_error(msg: impl Into<String>) -> McpError {
    McpError::internal_error(msg.into(), None)
}

pub(crate) fn invalid_params(msg: impl Into<String>) -> McpError {
    McpError::invalid_params(msg.into(), None)
}

fn doctor_error_to_mcp(err: DoctorError) -> McpError {
    match &err {
        DoctorError::FixNotFound(_) | DoctorError::UnknownClient(_) => {
            invalid_params(err.to_string())
        }
        DoctorError::Backup(_) => internal_error(err.to_string()),
    }
}

fn unknown_plan(plan_id: &str) -> McpError {
    invalid_params(format!(
        "Unknown plan id '{}'. Build a plan with build_repair_plan first.",
        plan_id
    ))
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Serialize)]
struct ServerList<'a> {
    count: usize,
    servers: Vec<&'a McpServer>,
}

#[derive(Serialize)]
struct PlanResponse<'a> {
    plan: &'a RepairPlan,
    unaddressed: Vec<&'a ErrorRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    advisor: Option<AdvisorSummary>,
}

#[derive(Serialize)]
struct AutoRepairResponse {
    repaired: bool,
    clients: usize,
}

// ============================================================================
// Handler Functions
// ============================================================================

pub async fn list_servers(
    server: &McpDoctorServer,
    params: ListServersParams,
) -> Result<CallToolResult, McpError> {
    let registry = server.engine().load_servers().await;
    let servers: Vec<&McpServer> = registry
        .iter()
        .filter(|s| params.client.map_or(true, |c| s.client == c))
        .collect();

    json_success(&ServerList {
        count: servers.len(),
        servers,
    })
}

pub async fn build_repair_plan(
    server: &McpDoctorServer,
    params: BuildRepairPlanParams,
) -> Result<CallToolResult, McpError> {
    let engine = server.engine();
    let registry = engine.load_servers().await;
    let mut plan = engine.build_plan(&registry, params.errors).await;

    let advisor = match params.log.as_deref() {
        Some(log) => engine.advise(&mut plan, log).await,
        None => None,
    };

    let result = json_success(&PlanResponse {
        plan: &plan,
        unaddressed: plan.unaddressed_errors(),
        advisor,
    });
    server.cache_plan(plan).await;
    result
}

pub async fn fix_all_issues(
    server: &McpDoctorServer,
    params: FixAllIssuesParams,
) -> Result<CallToolResult, McpError> {
    let engine = server.engine();
    let registry = engine.load_servers().await;
    let report = engine.fix_all_issues(&registry, params.errors).await;
    json_success(&report)
}

pub async fn confirm_fixes(
    server: &McpDoctorServer,
    params: ConfirmFixesParams,
) -> Result<CallToolResult, McpError> {
    let plan = server
        .take_plan(&params.plan_id)
        .await
        .ok_or_else(|| unknown_plan(&params.plan_id))?;

    let accepted: Vec<FixId> = params.accepted.into_iter().map(FixId::from).collect();
    let engine = server.engine();
    let registry = engine.load_servers().await;

    match engine.apply_confirmed(&registry, &plan, &accepted).await {
        Ok(report) => json_success(&report),
        Err(e) => {
            // Nothing ran; the plan stays available for a corrected request
            server.cache_plan(plan).await;
            Err(doctor_error_to_mcp(e))
        }
    }
}

pub async fn submit_advisor_fixes(
    server: &McpDoctorServer,
    params: SubmitAdvisorFixesParams,
) -> Result<CallToolResult, McpError> {
    let mut plans = server.plans().lock().await;
    let plan = plans
        .get_mut(&params.plan_id)
        .ok_or_else(|| unknown_plan(&params.plan_id))?;

    let summary = merge_report(plan, params.report);
    let plan: &RepairPlan = plan;
    json_success(&PlanResponse {
        plan,
        unaddressed: plan.unaddressed_errors(),
        advisor: Some(summary),
    })
}

pub async fn auto_repair(
    server: &McpDoctorServer,
    _params: AutoRepairParams,
) -> Result<CallToolResult, McpError> {
    let engine = server.engine();
    let repaired = engine.auto_repair().await;
    json_success(&AutoRepairResponse {
        repaired,
        clients: engine.targets().len(),
    })
}
