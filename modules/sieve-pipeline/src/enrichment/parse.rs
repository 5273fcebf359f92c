//! Parsers for model responses. Models wrap their answers in prose and code
//! fences, so every parser searches for the payload rather than expecting it.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use ai_client::util::{extract_flat_json_object, extract_json_object, strip_code_blocks};
use sieve_common::{EntitySet, Summary, DIMENSION_COUNT, DIMENSION_KEYS};

use super::{EnrichError, FailureKind};
use crate::scoring::{DimensionScores, MAX_DIMENSION_SCORE};

/// Fixed topic taxonomy. Anything else the model returns becomes "other".
pub const TOPIC_TAXONOMY: [&str; 17] = [
    "ai_regulation",
    "ai_capabilities",
    "surveillance",
    "platform_dynamics",
    "labor_displacement",
    "consolidation",
    "privacy",
    "content_moderation",
    "startup_funding",
    "layoffs",
    "acquisitions",
    "open_source",
    "hardware",
    "infrastructure",
    "cybersecurity",
    "crypto",
    "other",
];

pub const MAX_KEYWORDS: usize = 5;
pub const MAX_TOPICS: usize = 3;

static SUMMARY_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)SUMMARY:\s*(.*?)(?:KEYWORDS:|$)").expect("valid regex"));
static KEYWORDS_SECTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)KEYWORDS:\s*(.*)$").expect("valid regex"));

/// Summary plus keywords, from `SUMMARY:` / `KEYWORDS:` sections or a JSON
/// object with `summary` and `keywords`. Without markers the whole text
/// (up to any keyword section) is the summary.
pub fn parse_summary(text: &str) -> Result<Summary, EnrichError> {
    let text = strip_code_blocks(text);

    if let Some(summary) = summary_from_json(text) {
        return Ok(summary);
    }

    let mut summary = SUMMARY_SECTION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    let keywords = KEYWORDS_SECTION
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| split_keywords(m.as_str()))
        .unwrap_or_default();

    if summary.is_empty() {
        let body = match KEYWORDS_SECTION.find(text) {
            Some(m) => &text[..m.start()],
            None => text,
        };
        summary = body.trim().to_string();
    }

    if summary.is_empty() {
        return Err(EnrichError::new(
            FailureKind::EmptyResponse,
            "Could not parse summary from model response",
        ));
    }
    Ok(Summary {
        summary,
        keywords,
        ..Default::default()
    })
}

fn summary_from_json(text: &str) -> Option<Summary> {
    let object: Map<String, Value> = serde_json::from_str(extract_json_object(text)?).ok()?;
    let summary = object.get("summary")?.as_str()?.trim().to_string();
    if summary.is_empty() {
        return None;
    }
    let keywords = match object.get("keywords") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .take(MAX_KEYWORDS)
            .collect(),
        Some(Value::String(s)) => split_keywords(s),
        _ => Vec::new(),
    };
    Some(Summary {
        summary,
        keywords,
        ..Default::default()
    })
}

fn split_keywords(raw: &str) -> Vec<String> {
    raw.trim()
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .take(MAX_KEYWORDS)
        .collect()
}

/// Seven dimension scores from the first flat JSON object in the response.
/// Every dimension key is required; values are clamped to 0..=3.
pub fn parse_scores(text: &str) -> Result<DimensionScores, EnrichError> {
    let raw = extract_flat_json_object(text)
        .ok_or_else(|| EnrichError::parse("No JSON object in score response"))?;
    let object: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| EnrichError::parse(format!("Invalid score JSON: {e}")))?;

    let mut dimensions = [0u8; DIMENSION_COUNT];
    for (slot, key) in dimensions.iter_mut().zip(DIMENSION_KEYS) {
        let value = object
            .get(key)
            .ok_or_else(|| EnrichError::parse(format!("Missing score for {key}")))?;
        let score = score_value(value)
            .ok_or_else(|| EnrichError::parse(format!("Non-numeric score for {key}: {value}")))?;
        *slot = score.clamp(0, MAX_DIMENSION_SCORE as i64) as u8;
    }

    let rationale = match object.get("rationale") {
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    }
    .filter(|r| !r.is_empty());

    Ok(DimensionScores {
        dimensions,
        rationale,
    })
}

fn score_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
        }
        _ => None,
    }
}

/// Entities per category. Each category keeps at most its first ten entries,
/// trimmed, with blanks and non-strings dropped. An all-empty set is valid.
pub fn parse_entities(text: &str) -> Result<EntitySet, EnrichError> {
    let raw = extract_json_object(text)
        .ok_or_else(|| EnrichError::parse("No JSON object in entity response"))?;
    let object: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| EnrichError::parse(format!("Invalid entity JSON: {e}")))?;

    let mut entities = EntitySet::default();
    for category in EntitySet::CATEGORIES {
        let Some(Value::Array(values)) = object.get(category) else {
            continue;
        };
        let Some(slot) = entities.category_mut(category) else {
            continue;
        };
        *slot = values
            .iter()
            .take(EntitySet::MAX_PER_CATEGORY)
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    Ok(entities)
}

/// Up to three taxonomy topics. Unknown topics collapse into "other"; a
/// response with no usable topic is a parse failure.
pub fn parse_topics(text: &str) -> Result<Vec<String>, EnrichError> {
    let raw = extract_json_object(text)
        .ok_or_else(|| EnrichError::parse("No JSON object in topic response"))?;
    let object: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| EnrichError::parse(format!("Invalid topic JSON: {e}")))?;
    let Some(Value::Array(values)) = object.get("topics") else {
        return Err(EnrichError::parse("Topic response has no topics list"));
    };

    let mut topics: Vec<String> = Vec::new();
    for value in values {
        let Some(topic) = value.as_str().map(|t| t.trim().to_lowercase()) else {
            continue;
        };
        if topic.is_empty() {
            continue;
        }
        let topic = if TOPIC_TAXONOMY.contains(&topic.as_str()) {
            topic
        } else {
            "other".to_string()
        };
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }
    topics.truncate(MAX_TOPICS);

    if topics.is_empty() {
        return Err(EnrichError::parse("No valid topics in response"));
    }
    Ok(topics)
}

#[cfg(test)]
mod tests {
    use super::*;

    // --- summary ---

    #[test]
    fn summary_and_keyword_sections() {
        let text = "SUMMARY:\nRegulators moved on AI.\n\nKEYWORDS:\n[AI Act, Regulation , EU]";
        let parsed = parse_summary(text).unwrap();
        assert_eq!(parsed.summary, "Regulators moved on AI.");
        assert_eq!(parsed.keywords, vec!["ai act", "regulation", "eu"]);
    }

    #[test]
    fn summary_without_markers_uses_whole_text() {
        let parsed = parse_summary("  Just a paragraph.  ").unwrap();
        assert_eq!(parsed.summary, "Just a paragraph.");
        assert!(parsed.keywords.is_empty());
    }

    #[test]
    fn keywords_capped_at_five() {
        let parsed = parse_summary("SUMMARY: s\nKEYWORDS: a, b, c, d, e, f, g").unwrap();
        assert_eq!(parsed.keywords.len(), MAX_KEYWORDS);
    }

    #[test]
    fn summary_from_json_object() {
        let text = "```json\n{\"summary\": \"Chips are scarce.\", \"keywords\": [\"Chips\", \"supply\"]}\n```";
        let parsed = parse_summary(text).unwrap();
        assert_eq!(parsed.summary, "Chips are scarce.");
        assert_eq!(parsed.keywords, vec!["chips", "supply"]);
    }

    #[test]
    fn keywords_only_response_is_an_error() {
        let err = parse_summary("KEYWORDS: a, b").unwrap_err();
        assert_eq!(err.kind, FailureKind::EmptyResponse);
    }

    // --- scores ---

    fn score_json(extra: &str) -> String {
        format!(
            "Here are the scores: {{\"d1_attention_economy\": 3, \"d2_data_sovereignty\": 5, \
             \"d3_power_consolidation\": -1, \"d4_coercion_cooperation\": \"2\", \
             \"d5_fear_trust\": 1.9, \"d6_democratization\": 0, \"d7_systemic_design\": 2{extra}}}"
        )
    }

    #[test]
    fn scores_are_clamped_and_coerced() {
        let parsed = parse_scores(&score_json(", \"rationale\": \" Ad-driven. \"")).unwrap();
        assert_eq!(parsed.dimensions, [3, 3, 0, 2, 1, 0, 2]);
        assert_eq!(parsed.rationale.as_deref(), Some("Ad-driven."));
    }

    #[test]
    fn rationale_is_optional() {
        assert_eq!(parse_scores(&score_json("")).unwrap().rationale, None);
    }

    #[test]
    fn missing_dimension_is_a_parse_error() {
        let err = parse_scores("{\"d1_attention_economy\": 1}").unwrap_err();
        assert_eq!(err.kind, FailureKind::Parse);
        assert!(err.message.contains("d2_data_sovereignty"));
    }

    #[test]
    fn non_numeric_score_is_a_parse_error() {
        let text = score_json("").replace("\"2\"", "\"high\"");
        assert_eq!(parse_scores(&text).unwrap_err().kind, FailureKind::Parse);
    }

    #[test]
    fn no_json_is_a_parse_error() {
        assert_eq!(parse_scores("I cannot score this.").unwrap_err().kind, FailureKind::Parse);
    }

    // --- entities ---

    #[test]
    fn entities_are_trimmed_and_capped() {
        let many: Vec<String> = (0..15).map(|i| format!("\"Co{i}\"")).collect();
        let text = format!(
            "{{\"companies\": [{}], \"people\": [\" Lina Khan \", \"\", 7], \"products\": \"none\"}}",
            many.join(", ")
        );
        let parsed = parse_entities(&text).unwrap();
        assert_eq!(parsed.companies.len(), EntitySet::MAX_PER_CATEGORY);
        assert_eq!(parsed.people, vec!["Lina Khan"]);
        assert!(parsed.products.is_empty());
        assert!(parsed.legislation.is_empty());
    }

    #[test]
    fn empty_entity_object_is_valid() {
        assert!(parse_entities("{}").unwrap().is_empty());
    }

    #[test]
    fn invalid_entity_json_is_a_parse_error() {
        assert_eq!(parse_entities("{not json}").unwrap_err().kind, FailureKind::Parse);
    }

    // --- topics ---

    #[test]
    fn unknown_topics_map_to_other() {
        let parsed = parse_topics("{\"topics\": [\"Privacy\", \"space_travel\", \"weather\"]}").unwrap();
        assert_eq!(parsed, vec!["privacy", "other"]);
    }

    #[test]
    fn topics_capped_at_three() {
        let parsed = parse_topics(
            "{\"topics\": [\"privacy\", \"layoffs\", \"crypto\", \"hardware\"]}",
        )
        .unwrap();
        assert_eq!(parsed, vec!["privacy", "layoffs", "crypto"]);
    }

    #[test]
    fn no_topics_is_a_parse_error() {
        assert!(parse_topics("{\"topics\": []}").is_err());
        assert!(parse_topics("{\"topics\": \"privacy\"}").is_err());
        assert!(parse_topics("privacy").is_err());
    }
}
