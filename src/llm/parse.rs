//! Normalization of model output
//!
//! Models routinely wrap whole-file replies in markdown fences and planning
//! replies in fence-wrapped JSON with stray prose around it. Everything the
//! pipelines compare or commit goes through here first.

/// Strip one wrapping markdown code fence, with an optional language tag on
/// the opening line. Text that is not fenced passes through untouched.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // The opening line may carry a language tag; drop through the newline.
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        // A lone ``` line is not a fenced block.
        None => return trimmed,
    };
    let body = body.trim_end();
    match body.strip_suffix("```") {
        Some(inner) => inner.trim_end(),
        None => body,
    }
}

/// The candidate replacement content: fence-stripped and trimmed.
pub fn normalize_candidate(raw: &str) -> String {
    strip_code_fence(raw).trim().to_string()
}

/// Extract a JSON object fragment between the outermost braces.
pub fn extract_json_object(response: &str) -> Option<&str> {
    let clean = strip_code_fence(response);
    let start = clean.find('{')?;
    let end = clean.rfind('}')?;
    if start <= end {
        Some(&clean[start..=end])
    } else {
        None
    }
}

/// Fix the JSON mistakes models make most often.
pub fn fix_json_issues(json: &str) -> String {
    let mut fixed = json.to_string();

    // Remove trailing commas before ] or }
    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    // Smart quotes to regular quotes
    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    // Drop control characters that slipped in
    fixed = fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect();

    fixed
}
