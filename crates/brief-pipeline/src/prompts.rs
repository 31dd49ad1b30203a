//! Sub-agent prompt templates.
//!
//! Each builder returns a `(system_prompt, user_content)` pair for one of
//! the Generator's intents: strategy analyst, featured-section writer,
//! secondary-cards writer, assembler-and-publisher (tool mode), fact
//! checker, and report fixer.

use brief_types::{Blackboard, RunRow, Webhook};
use serde_json::Value;

use crate::engine::PublishTarget;
use crate::sections::buyer_type_label;

/// Delimiter the assembler emits between the report markdown and the
/// published page URL.
pub const URL_DELIMITER: &str = "---NOTION_URL---";
/// Marker the assembler emits after the delimiter when publishing failed.
pub const PUBLISH_FAILED_MARKER: &str = "PUBLISH_FAILED";

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

fn json_excerpt<T: serde::Serialize>(value: &T, max: usize) -> String {
    let raw = serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string());
    truncate_chars(&raw, max)
}

/// Prompt builders for the Generator sub-agents.
pub struct AgentPrompts;

impl AgentPrompts {
    /// Search-strategy analyst (s2). Prior completed runs, when present,
    /// must push the analyst toward different keywords and segments.
    pub fn search_strategy(webhook: &Webhook, prior_runs: &[RunRow]) -> (String, String) {
        let system = r#"You are a SLED (State, Local, Education, District) procurement intelligence analyst.

Analyze this vendor/product and determine which SLED buyer segments and search keywords would surface relevant procurement signals — active contracts, RFPs, board discussions, budget allocations — where this product could be a fit.

Return ONLY a JSON object with these exact keys:
{
  "sled_segments": ["HigherEducation", ...],
  "primary_keywords": ["keyword1", "keyword2", "keyword3"],
  "alternate_keywords": ["keyword4", "keyword5"],
  "meeting_keywords": ["phrase1", "phrase2", ...],
  "rfp_keywords": ["term1", "term2", ...],
  "buyer_types": ["HigherEducation", "SchoolDistrict"],
  "opportunity_types": ["Meeting", "Purchase", "RFP", "Contract"],
  "geographic_hints": ["California", ...] or [],
  "ideal_buyer_profile": "1-sentence description"
}

Valid buyer_types: HigherEducation, SchoolDistrict, School, City, County, StateAgency, PoliceDepartment, FireDepartment, Library, SpecialDistrict

Valid opportunity_types: Meeting, Purchase, RFP, Contract
You MUST return opportunity_types — this controls which procurement signals are searched.
Select the types most relevant to this product — include all 4 if broadly applicable, or narrow to 2-3 if the product targets specific procurement channels.

KEYWORD GUIDELINES:

primary_keywords (3-5): Most likely to match procurement signals overall. Should be procurement-relevant: 'career services technology' not just 'career'.

alternate_keywords (2-3): Broader terms for fallback searches.

meeting_keywords (up to 8): Action-oriented phrases matching board meeting agenda language — focus on PRE-procurement signals: problem identification, solution exploration, and planning activities. Use language like 'discussed challenges in [X]', 'explored options for [Y]', 'requested analysis of [Z]'. Include specific service areas in the phrases. AVOID late-stage procurement language (approved contract, awarded vendor). These surface early buying intent before an RFP is issued.

rfp_keywords (up to 8): Terms that appear in RFP/procurement documents — both specific product categories and general service descriptions. Include both specific and general variations. Focus on terms a procurement officer would use, not marketing language.

If PRIOR RUNS are provided, you MUST diversify — use different keyword angles, target different buyer segments, or shift geographic focus. Do NOT repeat the same primary_keywords or buyer_types from prior runs unless no alternatives exist."#;

        let mut content = format!(
            "Company: {}\nDomain: {}\nProduct Description: {}\nCampaign Signal: {}\n",
            webhook.target_company,
            webhook.target_domain,
            webhook.product_description,
            webhook.campaign_signal,
        );

        let completed: Vec<&RunRow> = prior_runs
            .iter()
            .filter(|r| r.status == "completed")
            .collect();
        if !completed.is_empty() {
            content.push_str("\n--- PRIOR RUNS FOR THIS DOMAIN ---\n");
            content.push_str(
                "Diversify your strategy — avoid repeating the same keywords and buyer selections.\n\n",
            );
            for (i, run) in completed.iter().enumerate() {
                content.push_str(&format!(
                    "Run {} ({}):\n",
                    i + 1,
                    run.created_at.as_deref().unwrap_or("?")
                ));
                if let Some(strategy) = &run.search_strategy {
                    content.push_str(&format!("  Strategy: {}\n", truncate_chars(strategy, 500)));
                }
                if let Some(featured) = &run.featured_buyer_name {
                    content.push_str(&format!("  Featured: {featured}\n"));
                }
                if let Some(secondary) = &run.secondary_buyers {
                    content.push_str(&format!("  Secondary: {}\n", truncate_chars(secondary, 300)));
                }
                content.push('\n');
            }
        }

        (system.to_string(), content)
    }

    /// Question posed to the Signals Provider's chat endpoint for the
    /// featured buyer (s6).
    pub fn featured_chat_question(buyer_name: &str) -> String {
        format!(
            "What are {buyer_name}'s key strategic priorities, recent technology initiatives, \
             major procurement activity, and any leadership changes in the past 12 months? \
             Include specific initiative names, dollar amounts, and dates where available."
        )
    }

    /// Featured-buyer deep dive writer (s9).
    pub fn featured_section(webhook: &Webhook, board: &Blackboard) -> (String, String) {
        let system = r#"You are generating the Featured Buyer section for a SLED intelligence report.

CRITICAL: You MUST use ONLY the data provided below. Do NOT use any outside knowledge.
The buyer name, profile data, contacts, and opportunities below are the ONLY source of truth.
If a field is missing from the data, OMIT that line — do NOT guess or fill in from memory.

Generate these sub-sections in order:

1. **BUYER SNAPSHOT CARD** — A blockquote card with:
   - Emoji for buyer type (🏛️=HigherEducation/StateAgency, 🏫=SchoolDistrict/School, 🏙️=City, 🏢=County)
   - Buyer name (MUST match the BUYER field below) and type label on the first line
   - State, City, size metric (Enrollment for education, Population for government)
   - Procurement Score (procurementHellScore, 0-100), Fiscal Year Start, Website, Phone
   - Omit any line where data is unavailable — do NOT invent values

2. **WHY THIS BUYER MATTERS** — Exactly 3 bullets. Each MUST:
   - Reference a SPECIFIC signal from the OPPORTUNITIES data below by name/title
   - Explain why it creates an opening for the prospect's product
   - Be concrete enough for a BDR to reference on a phone call
   BAD: "They invest in technology."
   GOOD: "Board approved $2.3M demonstration project for shared data infrastructure."

3. **KEY CONTACT** — Pick the single best contact from CONTACTS data below:
   - Prefer emailVerified=true, Director+ seniority, role overlap with product
   - Format: Name — Title — Email
   - MUST be a contact from the provided data, not invented

4. **RECENT STRATEGIC SIGNALS** — Top 3-5 signals from OPPORTUNITIES below:
   - Each: titled paragraph (2-4 sentences)
   - Include dates, dollar amounts, initiative names — ONLY from provided data
   - End each with parenthetical source: *(Board meeting, Nov 2025)*

Output as clean markdown. No meta-commentary. ZERO outside knowledge — data below only."#;

        let contacts: Vec<Value> = board
            .feat_contacts
            .clone()
            .unwrap_or_default()
            .into_iter()
            .take(20)
            .collect();
        let opportunities: Vec<Value> = board
            .feat_opportunities
            .clone()
            .unwrap_or_default()
            .into_iter()
            .take(15)
            .collect();

        let mut content = format!(
            "PROSPECT PRODUCT: {}\nPRODUCT DESCRIPTION: {}\nCAMPAIGN SIGNAL: {}\n\n\
             BUYER: {}\nBUYER TYPE: {}\n\n\
             BUYER PROFILE:\n{}\n\n\
             CONTACTS ({} total):\n{}\n\n\
             OPPORTUNITIES ({} total):\n{}\n\n",
            webhook.display_name(),
            webhook.product_description,
            webhook.campaign_signal,
            board.featured_buyer_name.as_deref().unwrap_or("Unknown"),
            board.featured_buyer_type.as_deref().unwrap_or(""),
            json_excerpt(&board.feat_profile, 3000),
            board.feat_contacts.as_ref().map(|c| c.len()).unwrap_or(0),
            json_excerpt(&contacts, 3000),
            board
                .feat_opportunities
                .as_ref()
                .map(|o| o.len())
                .unwrap_or(0),
            json_excerpt(&opportunities, 4000),
        );
        if let Some(ai_context) = &board.feat_ai_context {
            content.push_str(&format!(
                "AI STRATEGIC CONTEXT:\n{}\n",
                truncate_chars(ai_context, 3000)
            ));
        }

        (system.to_string(), content)
    }

    /// Secondary-cards writer (s10).
    pub fn secondary_cards(webhook: &Webhook, board: &Blackboard) -> (String, String) {
        let system = r#"Generate compact buyer cards for secondary SLED buyers.

For each buyer, output exactly:

**[Buyer Name]** | [Type Label]
- **Top Signal:** [Most relevant initiative, RFP, or procurement activity]
- **Key Contact:** [Name — Title — Email] (or 'No contacts available')
- **Relevance:** [1 sentence on why this buyer matters for the product]

Keep each card to 3-4 lines. Be specific — name initiatives, not generic claims.
Output as clean markdown. No meta-commentary."#;

        let mut content = format!(
            "PROSPECT PRODUCT: {}\nPRODUCT DESCRIPTION: {}\n\n",
            webhook.display_name(),
            webhook.product_description,
        );

        let secondaries = board.secondary_buyers.clone().unwrap_or_default();
        let profiles = board.sec_profiles.clone().unwrap_or_default();
        let contact_sets = board.sec_contacts.clone().unwrap_or_default();

        for (i, buyer) in secondaries.iter().enumerate() {
            content.push_str(&format!("--- BUYER {} ---\n", i + 1));
            content.push_str(&format!(
                "Name: {} | Type: {}\nScore: {:.3} | Signals: {}\nTop Signal: {} — {}\n",
                buyer.buyer_name,
                buyer_type_label(&buyer.buyer_type),
                buyer.score,
                buyer.signal_count,
                buyer.top_signal_type,
                buyer.top_signal_summary,
            ));

            if let Some(profile) = profiles.get(i) {
                if !profile.is_null() {
                    content.push_str(&format!("Profile: {}\n", json_excerpt(profile, 800)));
                }
            }
            let matching = contact_sets.iter().find(|set| {
                set.get("buyerId").and_then(Value::as_str) == Some(buyer.buyer_id.as_str())
            });
            if let Some(set) = matching {
                if let Some(Value::Array(contacts)) = set.get("contacts") {
                    if !contacts.is_empty() {
                        let sample: Vec<Value> = contacts.iter().take(5).cloned().collect();
                        content.push_str(&format!("Contacts: {}\n", json_excerpt(&sample, 800)));
                    }
                }
            }
            content.push('\n');
        }

        (system.to_string(), content)
    }

    /// Assembler-and-publisher (s12, tool mode). The sub-agent combines
    /// pre-generated sections, publishes via the workspace tool, and
    /// returns `report + delimiter + URL`.
    pub fn assemble_and_publish(
        webhook: &Webhook,
        board: &Blackboard,
        publish: &PublishTarget,
        month_year: &str,
    ) -> (String, String) {
        let system = format!(
            r#"You are assembling a final SLED intelligence report from pre-generated sections and publishing it to the document workspace.

═══ YOUR ROLE ═══

You are an ASSEMBLER. Specialized sub-agents have already generated each section from raw source data. Your job is to combine them into a single, cohesive report and publish it.

YOU MUST:
1. Add the report title header: # 📊 [Buyer Name] — Intelligence Report for [Product]
2. Include the FEATURED BUYER SECTION as-is
3. Include the ADDITIONAL BUYERS SECTION as-is (OMIT if empty or 'No secondary buyers')
4. Include the EXEC SUMMARY SECTION as-is
5. Include the CTA SECTION as-is
6. Add horizontal rules (---) between major sections
7. Add the footer: *Generated Brief Intelligence {month_year}*
   followed by: *Data source: buyer profile, contacts, AI analysis, and opportunity database*
8. Publish the assembled report to the workspace

YOU MUST NOT:
- Add facts, names, numbers, dates, or analysis not already in the sections
- Remove or significantly alter content from the provided sections
- Re-generate sections from scratch — use them as provided

═══ SECTION ORDER ═══

1. Title header
2. Featured Buyer Section (buyer snapshot, signals, contacts, analysis)
3. Additional Buyers Section (secondary buyer cards) — omit if none
4. Exec Summary Section
5. CTA Section
6. Footer

═══ WORKSPACE PUBLISHING ═══

After assembling the report markdown above, you MUST publish it.
Use the `{create_tool}` tool with these parameters:
  parent: {{"page_id": "{parent_id}"}}
  pages: [{{
    "properties": {{"title": "[Buyer Name] — Intelligence Report for [Product]"}},
    "content": "[THE FULL ASSEMBLED REPORT MARKDOWN]"
  }}]

═══ FINAL OUTPUT FORMAT ═══

After publishing, output your response in EXACTLY this format:
1. The complete report markdown (same content you published)
2. A delimiter line: {delimiter}
3. The page URL from the tool result on its own line

If the publish tool fails, still output the report markdown but put {failed_marker} after the delimiter.

OUTPUT: The report markdown + delimiter + URL. No meta-commentary."#,
            month_year = month_year,
            create_tool = publish.create_tool_alias,
            parent_id = publish.parent_page_id,
            delimiter = URL_DELIMITER,
            failed_marker = PUBLISH_FAILED_MARKER,
        );

        let content = format!(
            "TARGET COMPANY: {}\nPRODUCT DESCRIPTION: {}\n\n\
             FEATURED BUYER: {}\nBUYER TYPE: {}\n\n\
             --- FEATURED BUYER SECTION (generated by specialized sub-agent) ---\n{}\n\n\
             --- ADDITIONAL BUYERS SECTION (generated by specialized sub-agent) ---\n{}\n\n\
             --- EXEC SUMMARY SECTION (generated by specialized sub-agent) ---\n{}\n\n\
             --- CTA SECTION (generated by template) ---\n{}\n",
            webhook.display_name(),
            webhook.product_description,
            board.featured_buyer_name.as_deref().unwrap_or("Unknown"),
            board.featured_buyer_type.as_deref().unwrap_or(""),
            board.section_featured.as_deref().unwrap_or(""),
            board
                .section_secondary
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("No secondary buyers."),
            board.section_exec_summary.as_deref().unwrap_or(""),
            board.section_cta.as_deref().unwrap_or(""),
        );

        (system, content)
    }

    /// Internal-consistency fact checker (s13). Responds `PASS` or
    /// `FAIL <numbered issues>`.
    pub fn fact_check(buyer_name: &str, report: &str) -> (String, String) {
        let system = r#"You are a fact-checker reviewing a SLED intelligence report for internal consistency.

CHECK FOR:
- Contradictions within the report (e.g. buyer name differs between sections)
- Claims that appear fabricated (generic statements with no specifics)
- Contact information that looks malformed or placeholder-like
- Sections that reference data not present elsewhere in the report

IGNORE these (they are correct):
- ALL dates including the generation date and opportunity dates
- Aggregate counts (total signals, total buyers)
- Formatting, style, section structure

Respond with ONLY: PASS or FAIL followed by a numbered list of issues found."#;

        let content = format!(
            "BUYER: {buyer_name}\n\nREPORT TO CHECK:\n{}",
            truncate_chars(report, 4000)
        );
        (system.to_string(), content)
    }

    /// Report fixer (s13). Output is the corrected markdown only.
    pub fn fix_report(
        buyer_name: &str,
        report: &str,
        issues: &[String],
        warnings: &[String],
    ) -> (String, String) {
        let system = r#"You are a report editor fixing issues in a SLED intelligence report.

You will receive the original report markdown and a list of issues/warnings found by validation.

YOUR TASK:
- Fix every issue listed (these are blocking problems)
- Fix every warning listed (these are quality problems)
- Preserve ALL other content exactly as-is — do not rewrite, restyle, or reorganize
- If an issue mentions truncated/incomplete text, remove the broken fragment rather than guessing content
- If an issue mentions naming contradictions, pick the more specific/correct name and use it consistently
- If an issue mentions missing content (e.g. buyer name not in header), add it

OUTPUT:
Return ONLY the corrected report markdown. No commentary, no explanation, no delimiters.
The output must be the complete report — not a diff or partial update."#;

        let mut findings = String::new();
        if !issues.is_empty() {
            findings.push_str("BLOCKING ISSUES:\n");
            for issue in issues {
                findings.push_str(&format!("- {issue}\n"));
            }
            findings.push('\n');
        }
        if !warnings.is_empty() {
            findings.push_str("WARNINGS:\n");
            for warning in warnings {
                findings.push_str(&format!("- {warning}\n"));
            }
            findings.push('\n');
        }

        let content = format!(
            "BUYER: {buyer_name}\n\nVALIDATION FINDINGS:\n{findings}\nORIGINAL REPORT:\n{report}"
        );
        (system.to_string(), content)
    }
}

/// Split the assembler's output into report markdown and page URL.
///
/// Prefers the delimiter protocol; falls back to scanning for a workspace
/// URL when the sub-agent ignored the format. Returns an error string
/// suitable for the failure audit when neither works.
pub fn parse_assembler_output(output: &str) -> Result<(String, String), String> {
    if let Some((report, tail)) = output.split_once(URL_DELIMITER) {
        let tail = tail.trim();
        if tail.contains(PUBLISH_FAILED_MARKER) {
            return Err("assembler reported workspace publish failed".to_string());
        }
        let url = tail.lines().next().unwrap_or("").trim().to_string();
        if url.starts_with("http") {
            return Ok((report.trim().to_string(), url));
        }
        return Err(format!(
            "assembler emitted the delimiter but no URL (output length {})",
            output.len()
        ));
    }

    // Delimiter missing: salvage a URL if one is present anywhere.
    if let Ok(re) = regex::Regex::new(r"https://(?:www\.)?notion\.(?:so|site)/\S+") {
        if let Some(m) = re.find(output) {
            return Ok((output.trim().to_string(), m.as_str().to_string()));
        }
    }

    Err(format!(
        "workspace URL not found in assembler output (output length {})",
        output.len()
    ))
}
