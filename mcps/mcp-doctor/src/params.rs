//! Parameter types for mcp-doctor tools

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::advisor::AdvisorReport;
use crate::types::{ClientType, ErrorRecord};

/// Parameters for list_servers
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListServersParams {
    /// Only list servers registered with this client
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientType>,
}

/// Parameters for build_repair_plan
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BuildRepairPlanParams {
    /// Classified errors, each naming the server it belongs to
    pub errors: Vec<ErrorRecord>,

    /// Raw log text. When given and an advisor is configured, errors the
    /// built-in rules cannot fix are sent to the advisor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Parameters for fix_all_issues
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FixAllIssuesParams {
    /// Classified errors, each naming the server it belongs to
    pub errors: Vec<ErrorRecord>,
}

/// Parameters for confirm_fixes
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ConfirmFixesParams {
    /// Plan id returned by build_repair_plan
    pub plan_id: String,

    /// Fix ids the user accepted; every other fix in the plan is discarded
    #[serde(default)]
    pub accepted: Vec<String>,
}

/// Parameters for submit_advisor_fixes
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SubmitAdvisorFixesParams {
    /// Plan id returned by build_repair_plan
    pub plan_id: String,

    /// Suggested fixes. They are added as manual fixes and always need
    /// confirmation.
    pub report: AdvisorReport,
}

/// Parameters for auto_repair
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct AutoRepairParams {}
