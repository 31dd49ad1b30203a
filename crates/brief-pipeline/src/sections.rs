//! Deterministic report sections: the executive summary and CTA are pure
//! templates over discovery counts and segment labels, no LLM involved.

use brief_types::Blackboard;

/// Human label for a buyer type tag.
pub fn buyer_type_label(buyer_type: &str) -> &str {
    match buyer_type {
        "HigherEducation" => "Higher Education",
        "SchoolDistrict" => "School District",
        "City" => "City",
        "County" => "County",
        "StateAgency" => "State Agency",
        "School" => "School",
        "PoliceDepartment" => "Police Department",
        "FireDepartment" => "Fire Department",
        "Library" => "Library",
        "SpecialDistrict" => "Special District",
        other => other,
    }
}

/// Snapshot-card emoji for a buyer type tag.
pub fn buyer_type_emoji(buyer_type: &str) -> &str {
    match buyer_type {
        "HigherEducation" | "StateAgency" => "🏛️",
        "SchoolDistrict" | "School" => "🏫",
        "City" => "🏙️",
        "County" | "SpecialDistrict" => "🏢",
        "PoliceDepartment" => "👮",
        "FireDepartment" => "🚒",
        "Library" => "📚",
        _ => "📊",
    }
}

fn segment_phrase(segments: &[String], joiner: &str) -> String {
    if segments.is_empty() {
        return "SLED".to_string();
    }
    segments
        .iter()
        .take(3)
        .map(|s| buyer_type_label(s).to_string())
        .collect::<Vec<_>>()
        .join(joiner)
}

/// Executive summary (s8): counts and the featured match in three
/// sentences of bold-highlighted Markdown.
pub fn exec_summary(board: &Blackboard, product: &str) -> String {
    let signal_count = board.all_opportunities().len();
    let buyer_count = board
        .all_scored_buyers
        .as_ref()
        .map(|b| b.len())
        .unwrap_or(0);
    let featured = board.featured_buyer_name.as_deref().unwrap_or("Unknown");
    let featured_type = board.featured_buyer_type.as_deref().unwrap_or("");
    let segments = board
        .search_strategy
        .as_ref()
        .map(|s| s.sled_segments.as_slice())
        .unwrap_or(&[]);
    let seg_str = segment_phrase(segments, " and ");

    let mut summary = format!(
        "We scanned **{signal_count} procurement signals** across **{buyer_count} SLED buyers** \
         in the {seg_str} space for **{product}**. Leading match: **{featured}**"
    );
    let type_label = buyer_type_label(featured_type);
    if !type_label.is_empty() {
        summary.push_str(&format!(" ({type_label})"));
    }
    summary
        .push_str(", with the strongest combination of signal recency, urgency, and relevance.");
    summary
}

/// CTA section (s11): what the signals platform can do for this vendor,
/// closed with the scan totals.
pub fn cta(board: &Blackboard, product: &str) -> String {
    let total_signals = board.all_opportunities().len();
    let buyer_count = board
        .all_scored_buyers
        .as_ref()
        .map(|b| b.len())
        .unwrap_or(0);
    let segments = board
        .search_strategy
        .as_ref()
        .map(|s| s.sled_segments.as_slice())
        .unwrap_or(&[]);
    let seg_str = segment_phrase(segments, ", ");

    format!(
        "## What Brief Intelligence Can Do\n\n\
         Brief Intelligence monitors **296,000+ government and education buyers** across all 50 states, \
         with **107M+ indexed board meetings and procurement records**. \
         For {product} targeting {seg_str} buyers, we surface:\n\n\
         - **Active procurement signals** — RFPs, contract expirations, board discussions, and budget allocations\n\
         - **Verified decision-maker contacts** — directors, VPs, superintendents, and budget authorities\n\
         - **AI-powered buyer analysis** — strategic context synthesized from public records and FOIA data\n\n\
         This scan surfaced **{total_signals} signals** across **{buyer_count} buyers** \
         in the {seg_str} space."
    )
}

/// Current month-year footer token, English month names.
pub fn month_year(now: chrono::DateTime<chrono::Local>) -> String {
    now.format("%B %Y").to_string()
}
