use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::run::RunRow;
use crate::strategy::{ScoredBuyer, SearchStrategy};

// ============================================================================
// Blackboard
// ============================================================================

/// Typed blackboard threaded through the step graph.
///
/// Each field corresponds to one produced key and has exactly one producer
/// step per run. Steps return a delta of the same type; the orchestrator
/// merges deltas with [`Blackboard::merge`]. Worker branches receive a
/// clone and never mutate the orchestrator's copy directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Blackboard {
    // s1
    pub prior_runs: Option<Vec<RunRow>>,
    // s2
    pub search_strategy: Option<SearchStrategy>,
    // s3a..s3d
    pub discovery_signals_a: Option<Vec<Value>>,
    pub discovery_signals_b: Option<Vec<Value>>,
    pub discovery_buyers: Option<Vec<Value>>,
    pub discovery_buyers_geo: Option<Vec<Value>>,
    // s4
    pub all_scored_buyers: Option<Vec<ScoredBuyer>>,
    pub featured_buyer_id: Option<String>,
    pub featured_buyer_name: Option<String>,
    pub featured_buyer_type: Option<String>,
    pub secondary_buyers: Option<Vec<ScoredBuyer>>,
    pub selection_rationale: Option<String>,
    // s6
    pub feat_profile: Option<Value>,
    pub feat_contacts: Option<Vec<Value>>,
    pub feat_opportunities: Option<Vec<Value>>,
    pub feat_ai_context: Option<String>,
    // s7
    pub sec_profiles: Option<Vec<Value>>,
    pub sec_contacts: Option<Vec<Value>>,
    // s8..s11
    pub section_exec_summary: Option<String>,
    pub section_featured: Option<String>,
    pub section_secondary: Option<String>,
    pub section_cta: Option<String>,
    // s12..s13
    pub report_markdown: Option<String>,
    pub notion_url: Option<String>,
    pub validation_result: Option<ValidationReport>,
}

macro_rules! merge_fields {
    ($self:ident, $delta:ident, $($field:ident),+ $(,)?) => {
        $(
            if $delta.$field.is_some() {
                $self.$field = $delta.$field;
            }
        )+
    };
}

macro_rules! produced_fields {
    ($self:ident, $out:ident, $($field:ident),+ $(,)?) => {
        $(
            if $self.$field.is_some() {
                $out.push(stringify!($field));
            }
        )+
    };
}

impl Blackboard {
    /// Fold a step delta in. `Some` fields win; `None` fields never erase
    /// previously produced values.
    pub fn merge(&mut self, delta: Blackboard) {
        merge_fields!(
            self,
            delta,
            prior_runs,
            search_strategy,
            discovery_signals_a,
            discovery_signals_b,
            discovery_buyers,
            discovery_buyers_geo,
            all_scored_buyers,
            featured_buyer_id,
            featured_buyer_name,
            featured_buyer_type,
            secondary_buyers,
            selection_rationale,
            feat_profile,
            feat_contacts,
            feat_opportunities,
            feat_ai_context,
            sec_profiles,
            sec_contacts,
            section_exec_summary,
            section_featured,
            section_secondary,
            section_cta,
            report_markdown,
            notion_url,
            validation_result,
        );
    }

    /// Names of the keys produced so far, in declaration order. Used for
    /// failure payloads and audit metadata.
    pub fn produced_keys(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        produced_fields!(
            self,
            out,
            prior_runs,
            search_strategy,
            discovery_signals_a,
            discovery_signals_b,
            discovery_buyers,
            discovery_buyers_geo,
            all_scored_buyers,
            featured_buyer_id,
            featured_buyer_name,
            featured_buyer_type,
            secondary_buyers,
            selection_rationale,
            feat_profile,
            feat_contacts,
            feat_opportunities,
            feat_ai_context,
            sec_profiles,
            sec_contacts,
            section_exec_summary,
            section_featured,
            section_secondary,
            section_cta,
            report_markdown,
            notion_url,
            validation_result,
        );
        out
    }

    /// Union of both opportunity search branches.
    pub fn all_opportunities(&self) -> Vec<Value> {
        let mut out = Vec::new();
        if let Some(a) = &self.discovery_signals_a {
            out.extend(a.iter().cloned());
        }
        if let Some(b) = &self.discovery_signals_b {
            out.extend(b.iter().cloned());
        }
        out
    }
}

// ============================================================================
// Validation report
// ============================================================================

/// Outcome of the report validator (s13).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationReport {
    pub passed: bool,
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
    pub fixed: bool,
    pub checked_at: Option<String>,
}
