//! Deterministic report validation (s13). Checks are cheap string and
//! regex probes over the final Markdown; LLM consistency checking and the
//! corrective rewrite live in the step, not here.

/// Findings from the deterministic checks. Issues block (and trigger the
/// fixer); warnings trigger the fixer but never fail the run.
#[derive(Debug, Default, Clone)]
pub struct Findings {
    pub issues: Vec<String>,
    pub warnings: Vec<String>,
}

impl Findings {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty() && self.warnings.is_empty()
    }
}

pub fn check_report(
    report: &str,
    featured_buyer: &str,
    vendor: &str,
    secondary_buyers: &[String],
    month_year: &str,
) -> Findings {
    let mut findings = Findings::default();

    // 1. Featured buyer name appears in the header region.
    let head: String = report.chars().take(500).collect();
    if !featured_buyer.is_empty() && !head.contains(featured_buyer) {
        findings.issues.push(format!(
            "Header missing featured buyer name '{featured_buyer}'"
        ));
    }

    // 2. Vendor/product name appears somewhere, case-insensitive.
    if !vendor.is_empty() && !report.to_lowercase().contains(&vendor.to_lowercase()) {
        findings
            .issues
            .push(format!("Product name '{vendor}' not found in report"));
    }

    // 3. Current month-year footer token.
    if !report.contains(month_year) {
        findings
            .issues
            .push(format!("Footer missing current date '{month_year}'"));
    }

    // 4. Contact table rows with neither email nor phone.
    if let Ok(re) = regex::Regex::new(r"\|[^|\n]+\|[^|\n]+\|\s*—\s*\|\s*—\s*\|") {
        let bad_rows = re.find_iter(report).count();
        if bad_rows > 0 {
            findings
                .issues
                .push(format!("{bad_rows} contact rows with no email AND no phone"));
        }
    }

    // 5. Non-trivial length.
    let report_len = report.chars().count();
    if report_len < 500 {
        findings
            .issues
            .push(format!("Report suspiciously short ({report_len} chars)"));
    }

    // 6. Every email-shaped token must be a well-formed address.
    for email in malformed_emails(report) {
        findings
            .issues
            .push(format!("Malformed email address '{email}'"));
    }

    // 7. Selected secondary buyers should be mentioned; absence is only a
    //    warning since the cards section may legitimately compress names.
    for name in secondary_buyers {
        if !name.is_empty() && !report.contains(name.as_str()) {
            findings
                .warnings
                .push(format!("Secondary buyer '{name}' not mentioned in report"));
        }
    }

    findings
}

/// Email-shaped tokens that fail the strict address grammar.
fn malformed_emails(report: &str) -> Vec<String> {
    let Ok(candidate) = regex::Regex::new(r"[^\s|()<>\[\]]+@[^\s|()<>\[\]]+") else {
        return Vec::new();
    };
    let Ok(strict) = regex::Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$") else {
        return Vec::new();
    };

    candidate
        .find_iter(report)
        .map(|m| m.as_str().trim_matches(|c: char| ".,;:*".contains(c)))
        .filter(|token| !strict.is_match(token))
        .map(|token| token.to_string())
        .collect()
}
