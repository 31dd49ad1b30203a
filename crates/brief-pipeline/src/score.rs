//! Deterministic buyer scoring and featured/secondary selection (s4),
//! plus the state-code normalization used by the geographic search.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use brief_types::{ScoredBuyer, SearchStrategy};

use crate::error::{PipelineError, PipelineResult};

/// Tokens too common to count as keyword hits.
const STOP_WORDS: [&str; 12] = [
    "the", "and", "for", "with", "that", "this", "from", "their", "have", "will", "into", "about",
];

#[derive(Debug)]
pub struct RankOutcome {
    pub featured: ScoredBuyer,
    pub secondary: Vec<ScoredBuyer>,
    pub all_scored: Vec<ScoredBuyer>,
    pub rationale: String,
}

struct Candidate {
    id: String,
    name: String,
    buyer_type: String,
    signals: Vec<Value>,
}

/// Merge opportunities and direct buyer hits into one candidate set and
/// score it. Fails with a `ValidationError` when the union is empty.
///
/// Weights: type match 25%, signal count 20%, recency 20%, urgency 15%,
/// dollar value 10%, keyword overlap 10%. Count-like features normalize
/// by the per-run maximum; ties keep insertion order (stable sort).
pub fn rank_and_select(
    opportunities: &[Value],
    direct_buyers: &[Value],
    strategy: &SearchStrategy,
    max_secondary: usize,
    now: DateTime<Utc>,
) -> PipelineResult<RankOutcome> {
    // Buyer → signals map from opportunity results, in first-seen order.
    let mut order: Vec<String> = Vec::new();
    let mut candidates: HashMap<String, Candidate> = HashMap::new();

    for opp in opportunities {
        let Some(id) = first_str(opp, &["buyerId", "buyer_id", "id"]) else {
            continue;
        };
        let entry = candidates.entry(id.clone()).or_insert_with(|| {
            order.push(id.clone());
            Candidate {
                id: id.clone(),
                name: first_str(opp, &["buyerName", "buyer_name", "name"])
                    .unwrap_or_else(|| "Unknown".to_string()),
                buyer_type: first_str(opp, &["buyerType", "buyer_type"]).unwrap_or_default(),
                signals: Vec::new(),
            }
        });
        entry.signals.push(opp.clone());
    }

    // Direct buyers from the filter searches may carry zero signals.
    for buyer in direct_buyers {
        let Some(id) = first_str(buyer, &["id", "buyerId"]) else {
            continue;
        };
        if candidates.contains_key(&id) {
            continue;
        }
        order.push(id.clone());
        candidates.insert(
            id.clone(),
            Candidate {
                id: id.clone(),
                name: first_str(buyer, &["name", "buyerName"])
                    .unwrap_or_else(|| "Unknown".to_string()),
                buyer_type: first_str(buyer, &["type", "buyerType"]).unwrap_or_default(),
                signals: Vec::new(),
            },
        );
    }

    if order.is_empty() {
        return Err(PipelineError::Validation(
            "No buyers found across all searches — cannot generate report".to_string(),
        ));
    }

    let keyword_tokens = keyword_token_set(strategy);
    let target_types: HashSet<String> = strategy
        .buyer_types
        .iter()
        .map(|t| t.trim().to_lowercase())
        .collect();

    struct Features {
        sig_count: usize,
        recency: f64,
        urgency: f64,
        max_dollar: f64,
        kw_hits: usize,
        type_match: f64,
    }

    let mut featured_rows: Vec<(ScoredBuyer, Features)> = Vec::new();
    for id in &order {
        let candidate = &candidates[id];
        let features = Features {
            sig_count: candidate.signals.len(),
            recency: recency_score(&candidate.signals, now),
            urgency: urgency_score(&candidate.signals),
            max_dollar: max_dollar(&candidate.signals),
            kw_hits: keyword_hits(&candidate.signals, &keyword_tokens),
            type_match: type_match(&candidate.buyer_type, &target_types),
        };

        let top_signal = candidate.signals.first();
        featured_rows.push((
            ScoredBuyer {
                buyer_id: candidate.id.clone(),
                buyer_name: candidate.name.clone(),
                buyer_type: candidate.buyer_type.clone(),
                signal_count: features.sig_count,
                top_signal_type: top_signal
                    .and_then(|s| first_str(s, &["type", "opportunityType"]))
                    .unwrap_or_default(),
                top_signal_summary: top_signal
                    .and_then(|s| first_str(s, &["title", "summary"]))
                    .map(|s| s.chars().take(200).collect())
                    .unwrap_or_default(),
                score: 0.0,
            },
            features,
        ));
    }

    // Normalize count-like features by the per-run maximum, floored at 1
    // so an all-zero feature divides cleanly.
    let max_sig = featured_rows
        .iter()
        .map(|(_, f)| f.sig_count)
        .max()
        .unwrap_or(1)
        .max(1) as f64;
    let max_dol = featured_rows
        .iter()
        .map(|(_, f)| f.max_dollar)
        .fold(0.0_f64, f64::max)
        .max(1.0);
    let max_kw = featured_rows
        .iter()
        .map(|(_, f)| f.kw_hits)
        .max()
        .unwrap_or(1)
        .max(1) as f64;

    let mut scored: Vec<ScoredBuyer> = featured_rows
        .into_iter()
        .map(|(mut buyer, f)| {
            let score = 0.25 * f.type_match
                + 0.20 * (f.sig_count as f64 / max_sig)
                + 0.20 * f.recency
                + 0.15 * f.urgency
                + 0.10 * (f.max_dollar / max_dol)
                + 0.10 * (f.kw_hits as f64 / max_kw);
            buyer.score = (score * 10_000.0).round() / 10_000.0;
            buyer
        })
        .collect();

    // Stable sort keeps insertion order between equal scores.
    scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

    let featured = scored[0].clone();
    let secondary: Vec<ScoredBuyer> = scored.iter().skip(1).take(max_secondary).cloned().collect();

    let rationale = format!(
        "Selected {} (score: {:.3}) with {} signals. Top signal: {} — {}",
        featured.buyer_name,
        featured.score,
        featured.signal_count,
        featured.top_signal_type,
        featured.top_signal_summary.chars().take(100).collect::<String>(),
    );

    Ok(RankOutcome {
        featured,
        secondary,
        all_scored: scored,
        rationale,
    })
}

// ============================================================================
// Feature extraction
// ============================================================================

fn first_str(value: &Value, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(s) = value.get(*key).and_then(Value::as_str) {
            if !s.trim().is_empty() {
                return Some(s.to_string());
            }
        }
    }
    None
}

/// Most recent parsable date across the buyer's signals, mapped so a
/// signal from today scores 1.0 and anything a year old scores 0.0.
fn recency_score(signals: &[Value], now: DateTime<Utc>) -> f64 {
    let mut best = 0.0_f64;
    for signal in signals {
        let Some(raw) = first_str(signal, &["date", "createdAt", "created_at"]) else {
            continue;
        };
        if let Some(date) = parse_signal_date(&raw) {
            let age_days = (now.date_naive() - date).num_days();
            let score = ((365 - age_days).max(0)) as f64 / 365.0;
            best = best.max(score);
        }
    }
    best
}

fn parse_signal_date(raw: &str) -> Option<NaiveDate> {
    let normalized = raw.replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.date_naive());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    None
}

fn urgency_score(signals: &[Value]) -> f64 {
    for signal in signals {
        let signal_type = first_str(signal, &["type", "opportunityType"])
            .unwrap_or_default()
            .to_lowercase();
        if matches!(signal_type.as_str(), "rfp" | "contract" | "contract expiration") {
            return 1.0;
        }
        let title = first_str(signal, &["title", "summary"])
            .unwrap_or_default()
            .to_lowercase();
        if ["deadline", "expir", "due date", "rfp"]
            .iter()
            .any(|marker| title.contains(marker))
        {
            return 1.0;
        }
    }
    0.0
}

/// Maximum dollar amount across `amount | value | contractAmount`,
/// tolerating numbers and comma-formatted strings.
fn max_dollar(signals: &[Value]) -> f64 {
    let mut best = 0.0_f64;
    for signal in signals {
        for key in ["amount", "value", "contractAmount"] {
            match signal.get(key) {
                Some(Value::Number(n)) => {
                    if let Some(v) = n.as_f64() {
                        best = best.max(v);
                    }
                }
                Some(Value::String(s)) => {
                    let cleaned = s.replace(',', "");
                    if let Ok(re) = regex::Regex::new(r"\d+(?:\.\d+)?") {
                        for m in re.find_iter(&cleaned) {
                            if let Ok(v) = m.as_str().parse::<f64>() {
                                best = best.max(v);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    best
}

fn keyword_token_set(strategy: &SearchStrategy) -> HashSet<String> {
    let mut tokens: HashSet<String> = strategy
        .primary_keywords
        .iter()
        .flat_map(|kw| kw.split_whitespace())
        .map(|w| w.to_lowercase())
        .collect();

    for word in strategy.ideal_buyer_profile.split_whitespace() {
        let lowered: String = word
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        if lowered.len() > 3 && !STOP_WORDS.contains(&lowered.as_str()) {
            tokens.insert(lowered);
        }
    }
    tokens
}

fn keyword_hits(signals: &[Value], tokens: &HashSet<String>) -> usize {
    let mut hits = 0;
    for signal in signals {
        let text = format!(
            "{} {}",
            first_str(signal, &["title"]).unwrap_or_default(),
            first_str(signal, &["summary"]).unwrap_or_default(),
        )
        .to_lowercase();
        hits += tokens.iter().filter(|token| text.contains(*token)).count();
    }
    hits
}

/// 1.0 iff any of the buyer's (possibly comma-separated) types intersects
/// the strategy's buyer types.
fn type_match(buyer_type: &str, target_types: &HashSet<String>) -> f64 {
    if target_types.is_empty() {
        return 0.0;
    }
    let matched = buyer_type
        .split(',')
        .map(|t| t.trim().to_lowercase())
        .any(|t| target_types.contains(&t));
    if matched {
        1.0
    } else {
        0.0
    }
}

// ============================================================================
// State normalization
// ============================================================================

/// 50 US states plus DC: lowercase full name → postal code.
const STATE_TABLE: [(&str, &str); 51] = [
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("district of columbia", "DC"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("hawaii", "HI"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
];

/// Normalize geographic hints to two-letter state codes. Accepts codes in
/// any case and full names in any case; unknown names are dropped
/// silently. Order is preserved, duplicates removed.
pub fn normalize_states(hints: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for hint in hints {
        let trimmed = hint.trim();
        let code = if trimmed.len() == 2 {
            let upper = trimmed.to_uppercase();
            STATE_TABLE
                .iter()
                .find(|(_, c)| *c == upper)
                .map(|(_, c)| c.to_string())
        } else {
            let lowered = trimmed.to_lowercase();
            STATE_TABLE
                .iter()
                .find(|(name, _)| *name == lowered)
                .map(|(_, c)| c.to_string())
        };

        if let Some(code) = code {
            if seen.insert(code.clone()) {
                out.push(code);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap()
    }

    fn strategy() -> SearchStrategy {
        SearchStrategy {
            primary_keywords: vec!["career services".to_string()],
            buyer_types: vec!["HigherEducation".to_string()],
            ideal_buyer_profile: "large universities modernizing career services".to_string(),
            ..SearchStrategy::default()
        }
    }

    fn opp(buyer: &str, name: &str, signal_type: &str, title: &str, date: &str) -> Value {
        json!({
            "buyerId": buyer,
            "buyerName": name,
            "buyerType": "HigherEducation",
            "type": signal_type,
            "title": title,
            "date": date,
        })
    }

    #[test]
    fn empty_candidate_union_is_a_validation_error() {
        let err = rank_and_select(&[], &[], &strategy(), 4, now()).unwrap_err();
        match err {
            PipelineError::Validation(message) => assert!(message.contains("No buyers")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn buyer_with_more_recent_urgent_signals_wins() {
        let opportunities = vec![
            opp("B1", "State University", "RFP", "RFP for career services platform", "2026-01-15"),
            opp("B1", "State University", "Meeting", "Board discussed career services", "2026-01-20"),
            opp("B2", "Quiet College", "Meeting", "Routine facilities update", "2024-01-01"),
        ];

        let outcome = rank_and_select(&opportunities, &[], &strategy(), 4, now()).unwrap();
        assert_eq!(outcome.featured.buyer_id, "B1");
        assert_eq!(outcome.featured.signal_count, 2);
        assert_eq!(outcome.secondary.len(), 1);
        assert!(outcome.featured.score > outcome.secondary[0].score);
        assert!(outcome.rationale.contains("State University"));
    }

    #[test]
    fn direct_buyers_enter_with_empty_signals() {
        let buyers = vec![json!({ "id": "B9", "name": "Metro City", "type": "City" })];
        let outcome = rank_and_select(&[], &buyers, &strategy(), 4, now()).unwrap();
        assert_eq!(outcome.featured.buyer_id, "B9");
        assert_eq!(outcome.featured.signal_count, 0);
    }

    #[test]
    fn ranking_is_stable_for_tied_scores() {
        let buyers = vec![
            json!({ "id": "T1", "name": "First", "type": "City" }),
            json!({ "id": "T2", "name": "Second", "type": "City" }),
            json!({ "id": "T3", "name": "Third", "type": "City" }),
        ];
        let first = rank_and_select(&[], &buyers, &strategy(), 4, now()).unwrap();
        let second = rank_and_select(&[], &buyers, &strategy(), 4, now()).unwrap();

        let order: Vec<&str> = first.all_scored.iter().map(|b| b.buyer_id.as_str()).collect();
        assert_eq!(order, vec!["T1", "T2", "T3"], "insertion order breaks ties");
        assert_eq!(
            order,
            second
                .all_scored
                .iter()
                .map(|b| b.buyer_id.as_str())
                .collect::<Vec<_>>(),
            "sorting twice yields the same order"
        );
    }

    #[test]
    fn dollar_amounts_parse_from_numbers_and_strings() {
        let signals = vec![
            json!({ "amount": 1200.5 }),
            json!({ "contractAmount": "2,300,000" }),
            json!({ "value": "about $450.75 total" }),
        ];
        assert_eq!(max_dollar(&signals), 2_300_000.0);
    }

    #[test]
    fn urgency_triggers_on_type_or_title() {
        assert_eq!(urgency_score(&[json!({ "type": "Contract" })]), 1.0);
        assert_eq!(
            urgency_score(&[json!({ "type": "Meeting", "title": "Proposal due date announced" })]),
            1.0
        );
        assert_eq!(
            urgency_score(&[json!({ "type": "Meeting", "title": "Routine update" })]),
            0.0
        );
    }

    #[test]
    fn comma_separated_buyer_types_match() {
        let targets: HashSet<String> =
            ["schooldistrict".to_string()].into_iter().collect();
        assert_eq!(type_match("HigherEducation, SchoolDistrict", &targets), 1.0);
        assert_eq!(type_match("City", &targets), 0.0);
    }

    #[test]
    fn state_normalization_accepts_codes_and_names() {
        let hints = vec![
            "CA".to_string(),
            "ca".to_string(),
            "California".to_string(),
            "california".to_string(),
            "Narnia".to_string(),
            "New York".to_string(),
        ];
        assert_eq!(normalize_states(&hints), vec!["CA", "NY"]);
    }
}
