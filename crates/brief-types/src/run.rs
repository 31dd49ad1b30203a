use serde::{Deserialize, Serialize};

// ============================================================================
// Run lifecycle
// ============================================================================

/// Status of a pipeline run.
///
/// Lifecycle: `pending → processing → (completed | failed | cancelled)`.
/// Terminal statuses are immutable except for workspace-URL backfills on
/// completed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Processing => "processing",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(RunStatus::Pending),
            "processing" => Some(RunStatus::Processing),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// One `runs` row. JSON-valued columns are kept as raw strings; callers
/// decode the ones they need.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRow {
    pub id: i64,
    pub target_domain: String,
    pub target_company: Option<String>,
    pub product_description: Option<String>,
    pub campaign_id: Option<String>,
    pub prospect_name: Option<String>,
    pub prospect_email: Option<String>,
    pub tier: Option<String>,
    pub batch_id: Option<i64>,
    pub search_strategy: Option<String>,
    pub discovery_signals_a: Option<String>,
    pub discovery_signals_b: Option<String>,
    pub discovery_buyers: Option<String>,
    pub featured_buyer_id: Option<String>,
    pub featured_buyer_name: Option<String>,
    pub featured_buyer_type: Option<String>,
    pub selection_rationale: Option<String>,
    pub secondary_buyers: Option<String>,
    pub feat_profile: Option<String>,
    pub feat_contacts: Option<String>,
    pub feat_opportunities: Option<String>,
    pub feat_ai_context: Option<String>,
    pub sec_profiles: Option<String>,
    pub sec_contacts: Option<String>,
    pub section_exec_summary: Option<String>,
    pub section_featured: Option<String>,
    pub section_secondary: Option<String>,
    pub section_cta: Option<String>,
    pub report_markdown: Option<String>,
    pub validation_result: Option<String>,
    pub notion_url: Option<String>,
    pub status: String,
    pub created_at: Option<String>,
    pub completed_at: Option<String>,
}

impl RunRow {
    pub fn status(&self) -> Option<RunStatus> {
        RunStatus::parse(&self.status)
    }
}

/// Lightweight run row for listings and status polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: i64,
    pub target_domain: String,
    pub target_company: Option<String>,
    pub status: String,
    pub created_at: Option<String>,
    pub completed_at: Option<String>,
    pub featured_buyer_name: Option<String>,
    pub notion_url: Option<String>,
    pub batch_id: Option<i64>,
}

// ============================================================================
// Audit log
// ============================================================================

/// Audit status of one executed step or notable pipeline event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    Success,
    Failure,
    Timeout,
    Warning,
    Skipped,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failure => "failure",
            AuditStatus::Timeout => "timeout",
            AuditStatus::Warning => "warning",
            AuditStatus::Skipped => "skipped",
        }
    }
}

/// One `audit_log` row. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub run_id: i64,
    pub step: String,
    pub status: String,
    pub message: Option<String>,
    pub duration_seconds: Option<f64>,
    pub metadata: Option<String>,
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrips_through_strings() {
        for status in [
            RunStatus::Pending,
            RunStatus::Processing,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::parse("running"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Processing.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }
}
