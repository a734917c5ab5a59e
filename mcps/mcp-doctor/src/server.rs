//! mcp-doctor MCP server implementation

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::handlers;
use crate::orchestrator::RepairEngine;
use crate::types::RepairPlan;

/// Plans kept for confirmation before the oldest is dropped
const MAX_PENDING_PLANS: usize = 32;

/// Plans awaiting confirmation, by plan id, oldest first
#[derive(Debug, Default)]
pub(crate) struct PendingPlans {
    plans: HashMap<String, RepairPlan>,
    order: VecDeque<String>,
}

impl PendingPlans {
    pub(crate) fn insert(&mut self, plan: RepairPlan) {
        self.order.retain(|id| id != &plan.id);
        while self.order.len() >= MAX_PENDING_PLANS {
            if let Some(oldest) = self.order.pop_front() {
                debug!(plan = %oldest, "dropping unconfirmed plan");
                self.plans.remove(&oldest);
            }
        }
        self.order.push_back(plan.id.clone());
        self.plans.insert(plan.id.clone(), plan);
    }

    pub(crate) fn take(&mut self, plan_id: &str) -> Option<RepairPlan> {
        self.order.retain(|id| id != plan_id);
        self.plans.remove(plan_id)
    }

    pub(crate) fn get_mut(&mut self, plan_id: &str) -> Option<&mut RepairPlan> {
        self.plans.get_mut(plan_id)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.plans.len()
    }
}

type PlanCache = Arc<Mutex<PendingPlans>>;

/// mcp-doctor MCP server
#[derive(Clone)]
pub struct McpDoctorServer {
    engine: Arc<RepairEngine>,
    plans: PlanCache,
    tool_router: ToolRouter<Self>,
}

impl McpDoctorServer {
    pub fn new(engine: RepairEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            plans: Arc::new(Mutex::new(PendingPlans::default())),
            tool_router: Self::tool_router(),
        }
    }

    pub fn engine(&self) -> &RepairEngine {
        &self.engine
    }

    pub(crate) fn plans(&self) -> &PlanCache {
        &self.plans
    }

    pub(crate) async fn cache_plan(&self, plan: RepairPlan) {
        self.plans.lock().await.insert(plan);
    }

    pub(crate) async fn take_plan(&self, plan_id: &str) -> Option<RepairPlan> {
        self.plans.lock().await.take(plan_id)
    }
}

// MCP tool router
#[tool_router]
impl McpDoctorServer {
    /// List MCP servers registered in the managed client configs
    #[tool(description = "List MCP servers registered in Claude Desktop, Cursor, Windsurf and VS Code configs")]
    async fn list_servers(
        &self,
        Parameters(params): Parameters<crate::params::ListServersParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::list_servers(self, params).await
    }

    /// Build a repair plan for classified errors
    #[tool(
        description = "Build a repair plan from classified server errors. Returns the plan id, proposed fixes, whether confirmation is required, and errors no rule addresses"
    )]
    async fn build_repair_plan(
        &self,
        Parameters(params): Parameters<crate::params::BuildRepairPlanParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::build_repair_plan(self, params).await
    }

    /// Plan and apply automatic fixes
    #[tool(
        description = "Build a plan and apply only its automatic fixes, in order. Manual fixes are reported as skipped and never applied"
    )]
    async fn fix_all_issues(
        &self,
        Parameters(params): Parameters<crate::params::FixAllIssuesParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::fix_all_issues(self, params).await
    }

    /// Apply the fixes the user accepted
    #[tool(
        description = "Apply the fixes the user accepted from a plan; all other fixes in the plan are discarded. Only call after the user has explicitly agreed"
    )]
    async fn confirm_fixes(
        &self,
        Parameters(params): Parameters<crate::params::ConfirmFixesParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::confirm_fixes(self, params).await
    }

    /// Add advisor suggestions to a plan
    #[tool(
        description = "Add your own suggested fixes for unaddressed errors to a plan. They are always manual and require confirmation"
    )]
    async fn submit_advisor_fixes(
        &self,
        Parameters(params): Parameters<crate::params::SubmitAdvisorFixesParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::submit_advisor_fixes(self, params).await
    }

    /// Back up and syntax-repair every client config
    #[tool(description = "Back up each client config if due, then repair JSON syntax errors. Returns whether anything was repaired")]
    async fn auto_repair(
        &self,
        Parameters(params): Parameters<crate::params::AutoRepairParams>,
    ) -> Result<CallToolResult, McpError> {
        handlers::auto_repair(self, params).await
    }
}

// ============================================================================
// Server Handler Implementation
// ============================================================================

#[tool_handler]
impl rmcp::ServerHandler for McpDoctorServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Diagnoses and repairs locally installed MCP servers. \
                 Pass classified errors to build_repair_plan, show the plan to the user, \
                 and call confirm_fixes only with the fix ids they accept. \
                 fix_all_issues applies automatic fixes without asking. \
                 For errors no rule addresses, propose fixes with submit_advisor_fixes."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
