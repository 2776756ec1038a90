use crate::evidence::{truncate_utf8_safe, Classification, EvidenceRecord};

const SNIPPET_LIMIT: usize = 500;

const SYSTEM_PROMPT: &str = "You are a security analyst triaging evidence of a Model-Context-Protocol \
(MCP) server running somewhere on an enterprise fleet. You must classify the instance as exactly one \
of three labels:\n\
AUTHORIZED - the instance matches a known, approved deployment.\n\
SUSPECT - the evidence is ambiguous; legitimacy cannot be confirmed or denied.\n\
UNAUTHORIZED - the evidence indicates an unapproved or hidden MCP instance.\n\
Base your classification on the evidence blocks provided, weighting corroborating evidence from \
multiple sources more heavily than a single weak signal.";

/// Builds the deterministic user prompt: ordered evidence blocks followed by
/// the exact three-line response footer (spec §4.4, §6).
pub fn build_user_prompt(evidence: &[EvidenceRecord]) -> String {
    let mut body = String::new();
    body.push_str("Evidence bundle:\n\n");
    for (i, record) in evidence.iter().enumerate() {
        body.push_str(&format!("--- Evidence {} ---\n", i + 1));
        body.push_str(&format!("source_kind: {:?}\n", record.source_kind));
        body.push_str(&format!("source_label: {}\n", record.source_label));
        body.push_str(&format!("host_identifier: {}\n", record.host_identifier));
        body.push_str(&format!("score_contribution: {}\n", record.score_contribution));
        let details_json = serde_json::to_string(&record.details).unwrap_or_default();
        let truncated = truncate_utf8_safe(details_json.as_bytes(), SNIPPET_LIMIT);
        body.push_str("details: ");
        body.push_str(&String::from_utf8_lossy(truncated));
        body.push('\n');
        if let Some(snippet) = &record.snippet {
            let truncated = truncate_utf8_safe(snippet, SNIPPET_LIMIT);
            body.push_str("snippet: ");
            body.push_str(&String::from_utf8_lossy(truncated));
            body.push('\n');
        }
        body.push('\n');
    }
    body.push_str(
        "Respond in exactly this three-line format:\n\
         CLASSIFICATION: [AUTHORIZED|SUSPECT|UNAUTHORIZED]\n\
         CONFIDENCE: [0-100]\n\
         REASONING: [your analysis]\n",
    );
    body
}

pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

pub struct ParsedResponse {
    pub classification: Classification,
    pub confidence: u8,
    pub reasoning: String,
}

/// Anchored, case-insensitive line-prefix parse with the fallback rules from
/// spec §4.4: classification falls back to `suspect`, confidence clamps to
/// `[0,100]`, reasoning defaults to the whole response body.
pub fn parse_response(body: &str) -> ParsedResponse {
    let mut classification = None;
    let mut confidence = None;
    let mut reasoning = None;

    for line in body.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_prefix_ci(trimmed, "CLASSIFICATION:") {
            classification = Classification::from_str_loose(rest.trim());
        } else if let Some(rest) = strip_prefix_ci(trimmed, "CONFIDENCE:") {
            confidence = rest.trim().parse::<i64>().ok();
        } else if let Some(rest) = strip_prefix_ci(trimmed, "REASONING:") {
            reasoning = Some(rest.trim().to_string());
        }
    }

    ParsedResponse {
        classification: classification.unwrap_or(Classification::Suspect),
        confidence: confidence.map(|c| c.clamp(0, 100) as u8).unwrap_or(0),
        reasoning: reasoning.unwrap_or_else(|| body.trim().to_string()),
    }
}

fn strip_prefix_ci<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    if line.len() >= prefix.len() && line[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&line[prefix.len()..])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_three_line_response() {
        let body = "CLASSIFICATION: UNAUTHORIZED\nCONFIDENCE: 87\nREASONING: no approved registry entry";
        let parsed = parse_response(body);
        assert_eq!(parsed.classification, Classification::Unauthorized);
        assert_eq!(parsed.confidence, 87);
        assert_eq!(parsed.reasoning, "no approved registry entry");
    }

    #[test]
    fn is_case_insensitive_on_the_label_value() {
        let body = "classification: authorized\nconfidence: 10\nreasoning: fine";
        let parsed = parse_response(body);
        assert_eq!(parsed.classification, Classification::Authorized);
    }

    #[test]
    fn unrecognised_classification_falls_back_to_suspect() {
        let body = "CLASSIFICATION: MAYBE\nCONFIDENCE: 50\nREASONING: unsure";
        let parsed = parse_response(body);
        assert_eq!(parsed.classification, Classification::Suspect);
    }

    #[test]
    fn confidence_out_of_range_is_clamped() {
        let body = "CLASSIFICATION: SUSPECT\nCONFIDENCE: 500\nREASONING: noisy";
        let parsed = parse_response(body);
        assert_eq!(parsed.confidence, 100);
    }

    #[test]
    fn missing_footer_defaults_reasoning_to_whole_body() {
        let body = "the model just rambled instead of following the format";
        let parsed = parse_response(body);
        assert_eq!(parsed.classification, Classification::Suspect);
        assert_eq!(parsed.reasoning, body);
    }
}
