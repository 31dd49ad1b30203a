use serde::{Deserialize, Serialize};

/// The four opportunity record types the Signals Provider indexes.
pub const OPPORTUNITY_TYPES: [&str; 4] = ["Meeting", "Purchase", "RFP", "Contract"];

/// Output of the search-strategy analyst (s2), after defaults are applied.
///
/// The analyst returns JSON; missing keys are tolerated at parse time and
/// filled by [`SearchStrategy::apply_defaults`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchStrategy {
    #[serde(default)]
    pub sled_segments: Vec<String>,
    #[serde(default)]
    pub primary_keywords: Vec<String>,
    #[serde(default)]
    pub alternate_keywords: Vec<String>,
    #[serde(default)]
    pub meeting_keywords: Vec<String>,
    #[serde(default)]
    pub rfp_keywords: Vec<String>,
    #[serde(default)]
    pub buyer_types: Vec<String>,
    #[serde(default)]
    pub opportunity_types: Vec<String>,
    #[serde(default)]
    pub geographic_hints: Vec<String>,
    #[serde(default)]
    pub ideal_buyer_profile: String,
}

impl SearchStrategy {
    /// Fill the fallbacks the pipeline depends on:
    /// - primary keywords fall back to the campaign signal or company name
    /// - opportunity types fall back to all four, and unknown types are dropped
    /// - segments mirror buyer types when the analyst omitted them
    pub fn apply_defaults(&mut self, fallback_keyword: &str, product_description: &str) {
        if self.primary_keywords.iter().all(|k| k.trim().is_empty()) {
            self.primary_keywords = vec![fallback_keyword.to_string()];
        }

        self.opportunity_types
            .retain(|t| OPPORTUNITY_TYPES.contains(&t.as_str()));
        if self.opportunity_types.is_empty() {
            self.opportunity_types = OPPORTUNITY_TYPES.iter().map(|t| t.to_string()).collect();
        }

        if self.sled_segments.is_empty() {
            self.sled_segments = self.buyer_types.clone();
        }

        if self.ideal_buyer_profile.trim().is_empty() {
            self.ideal_buyer_profile = product_description.chars().take(200).collect();
        }
    }
}

/// One scored buyer candidate out of s4. Ordering within a run is the
/// ranking order; insertion order breaks ties (stable sort).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredBuyer {
    pub buyer_id: String,
    pub buyer_name: String,
    pub buyer_type: String,
    pub signal_count: usize,
    pub top_signal_type: String,
    pub top_signal_summary: String,
    pub score: f64,
}
