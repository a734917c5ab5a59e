//! AI advisor contract
//!
//! An advisor reads raw log text plus the already-classified errors and
//! suggests fixes. Suggestions are advisory only: they carry no automatic
//! flag and always become manual fixes.

use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::types::{Change, ErrorRecord, Fix, FixId, FixSource, RepairPlan};

/// One fix proposed by an advisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SuggestedFix {
    /// The error this suggestion addresses
    pub error: ErrorRecord,
    pub description: String,
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// What an advisor returns for one log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AdvisorReport {
    #[serde(default)]
    pub suggested_fixes: Vec<SuggestedFix>,
    /// 0-100; out-of-range values are clamped
    #[serde(default, deserialize_with = "clamp_confidence")]
    pub confidence: u8,
    #[serde(default)]
    pub explanation: String,
}

fn clamp_confidence<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.is_nan() {
        return Ok(0);
    }
    Ok(value.clamp(0.0, 100.0).round() as u8)
}

/// Result of merging advisor output into a plan
#[derive(Debug, Clone, Serialize)]
pub struct AdvisorSummary {
    pub added: Vec<FixId>,
    pub confidence: u8,
    pub explanation: String,
    pub requires_confirmation: bool,
}

#[async_trait]
pub trait AiAdvisor: Send + Sync {
    async fn analyze_log(&self, content: &str, known_errors: &[ErrorRecord])
        -> Result<AdvisorReport>;
}

/// Merge an advisor report into `plan` as manual advisor fixes.
///
/// Advisor ids continue from the advisor fixes already in the plan, so
/// repeated merges never collide.
pub fn merge_report(plan: &mut RepairPlan, report: AdvisorReport) -> AdvisorSummary {
    let offset = plan
        .fixes
        .iter()
        .filter(|f| f.source() == FixSource::Advisor)
        .count();

    let fixes: Vec<Fix> = report
        .suggested_fixes
        .into_iter()
        .enumerate()
        .map(|(i, suggestion)| {
            let scope = suggestion.error.server().unwrap_or("plan").to_string();
            Fix::advised(
                FixId::advisor(&scope, offset + i),
                suggestion.error,
                suggestion.description,
                suggestion.changes,
            )
        })
        .collect();

    let added = fixes.iter().map(|f| f.id().clone()).collect();
    plan.merge_fixes(fixes);

    AdvisorSummary {
        added,
        confidence: report.confidence,
        explanation: report.explanation,
        requires_confirmation: plan.requires_confirmation,
    }
}

// ============================================================================
// External Command Advisor
// ============================================================================

/// Advisor backed by an external program.
///
/// The program receives a JSON request on stdin and must print an
/// [`AdvisorReport`] as JSON on stdout. Surrounding prose is tolerated; the
/// outermost JSON object is extracted.
#[derive(Debug, Clone)]
pub struct CommandAdvisor {
    program: String,
    args: Vec<String>,
}

#[derive(Serialize)]
struct AdvisorRequest<'a> {
    instructions: &'static str,
    log: &'a str,
    known_errors: &'a [ErrorRecord],
    response_schema: schemars::Schema,
}

const INSTRUCTIONS: &str = "Diagnose why these MCP servers fail to start. Reply with a JSON object \
matching response_schema: suggested_fixes (each with the error it addresses, a description and \
concrete changes), confidence from 0 to 100, and a short explanation.";

impl CommandAdvisor {
    /// Build from an argv list; the first element is the program
    pub fn from_argv(argv: &[String]) -> Option<Self> {
        let (program, args) = argv.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }
}

#[async_trait]
impl AiAdvisor for CommandAdvisor {
    async fn analyze_log(
        &self,
        content: &str,
        known_errors: &[ErrorRecord],
    ) -> Result<AdvisorReport> {
        let request = AdvisorRequest {
            instructions: INSTRUCTIONS,
            log: content,
            known_errors,
            response_schema: schemars::schema_for!(AdvisorReport),
        };
        let payload = serde_json::to_vec(&request)?;

        debug!(program = %self.program, "invoking advisor");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start advisor '{}'", self.program))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            bail!(
                "advisor exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let report = parse_report(&String::from_utf8_lossy(&output.stdout))?;
        info!(
            suggestions = report.suggested_fixes.len(),
            confidence = report.confidence,
            "advisor responded"
        );
        Ok(report)
    }
}

fn parse_report(stdout: &str) -> Result<AdvisorReport> {
    let start = stdout.find('{');
    let end = stdout.rfind('}');
    let json = match (start, end) {
        (Some(s), Some(e)) if s < e => &stdout[s..=e],
        _ => bail!("advisor output contains no JSON object"),
    };
    serde_json::from_str(json).context("Failed to parse advisor report")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorKind, FixSource};
    use serde_json::json;

    fn suggestion(server: &str) -> SuggestedFix {
        SuggestedFix {
            error: ErrorRecord::new(ErrorKind::NetworkError, "ECONNREFUSED").for_server(server),
            description: "Start the upstream service".to_string(),
            changes: vec![],
        }
    }

    #[test]
    fn test_confidence_clamped() {
        let high: AdvisorReport =
            serde_json::from_value(json!({ "confidence": 250, "explanation": "x" })).unwrap();
        let low: AdvisorReport =
            serde_json::from_value(json!({ "confidence": -3.5, "explanation": "x" })).unwrap();
        assert_eq!(high.confidence, 100);
        assert_eq!(low.confidence, 0);
    }

    #[test]
    fn test_automatic_flag_in_suggestion_is_ignored() {
        let report: AdvisorReport = serde_json::from_value(json!({
            "suggested_fixes": [{
                "error": { "kind": "NetworkError", "message": "timeout", "server": "s1" },
                "description": "retry",
                "automatic_fix": true
            }],
            "confidence": 99,
            "explanation": "sure"
        }))
        .unwrap();

        let mut plan = RepairPlan::new(vec![], vec![]);
        merge_report(&mut plan, report);

        assert!(!plan.fixes[0].is_automatic());
        assert!(plan.requires_confirmation);
    }

    #[test]
    fn test_merge_keeps_confirmation_and_ids_unique() {
        let mut plan = RepairPlan::new(vec![], vec![]);
        let report = AdvisorReport {
            suggested_fixes: vec![suggestion("s1"), suggestion("s2")],
            confidence: 40,
            explanation: "upstream down".to_string(),
        };

        let first = merge_report(&mut plan, report.clone());
        let second = merge_report(&mut plan, report);

        assert_eq!(
            first.added,
            vec![FixId::advisor("s1", 0), FixId::advisor("s2", 1)]
        );
        assert_eq!(
            second.added,
            vec![FixId::advisor("s1", 2), FixId::advisor("s2", 3)]
        );
        assert!(second.requires_confirmation);
        assert!(plan.fixes.iter().all(|f| f.source() == FixSource::Advisor));
    }

    #[test]
    fn test_parse_report_tolerates_prose() {
        let report = parse_report(
            "Here is my analysis:\n{\"confidence\": 70, \"explanation\": \"port in use\"}\nDone.",
        )
        .unwrap();
        assert_eq!(report.confidence, 70);
        assert!(parse_report("no json here").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_advisor_round_trip() {
        let argv = vec![
            "sh".to_string(),
            "-c".to_string(),
            "cat > /dev/null; echo '{\"confidence\": 55, \"explanation\": \"ok\"}'".to_string(),
        ];
        let advisor = CommandAdvisor::from_argv(&argv).unwrap();

        let report = advisor.analyze_log("log text", &[]).await.unwrap();
        assert_eq!(report.confidence, 55);
        assert_eq!(report.explanation, "ok");
    }

    #[test]
    fn test_from_argv_requires_program() {
        assert!(CommandAdvisor::from_argv(&[]).is_none());
    }
}
