//! Analysis prompt and response parsing.

use serde::Serialize;
use vsum_models::{format_duration, ExtractionPlan, Language};

pub const HEADING_SUMMARY: &str = "## Summary";
pub const HEADING_KEY_POINTS: &str = "## Key Points";
pub const HEADING_DETAILS: &str = "## Details";

/// Inputs to the analysis prompt.
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub plan: &'a ExtractionPlan,
    pub frame_count: usize,
    pub duration_seconds: f64,
    pub language: Language,
    pub custom_prompt: Option<&'a str>,
}

/// Build the fixed three-section analysis prompt.
pub fn build_prompt(ctx: &PromptContext<'_>) -> String {
    let mut prompt = format!(
        "The following {count} frames were sampled from one video ({sampling}). \
         The full video is {duration} long.\n\
         \n\
         These frames come from a single continuous video. Do not describe frames one by one; \
         summarize the video as a whole, following its narrative from start to end.\n\
         \n\
         Respond in exactly this format:\n\
         \n\
         {summary}\n\
         (3-5 sentences on the topic and content of the whole video)\n\
         \n\
         {key_points}\n\
         (the core messages or information as bullet points)\n\
         \n\
         {details}\n\
         - **Elements**: main people, places and objects\n\
         - **On-screen text**: notable text shown in the video, if any\n\
         - **Tone**: the overall mood of the video\n\
         \n\
         Rules:\n\
         - Do not mention frame numbers such as \"Frame 1\".\n\
         - Do not print intermediate reasoning or plans. Start directly with \"{summary}\".",
        count = ctx.frame_count,
        sampling = ctx.plan.mode,
        duration = format_duration(ctx.duration_seconds),
        summary = HEADING_SUMMARY,
        key_points = HEADING_KEY_POINTS,
        details = HEADING_DETAILS,
    );

    let instruction = ctx.language.instruction();
    if !instruction.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(instruction);
    }

    if let Some(extra) = ctx.custom_prompt.map(str::trim).filter(|p| !p.is_empty()) {
        prompt.push_str("\n\n**Additional request**: ");
        prompt.push_str(extra);
    }

    prompt
}

/// Parsed provider response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AnalysisText {
    /// Output exactly as the provider printed it
    pub raw: String,
    /// Output from the first heading on
    pub markdown: String,
    pub summary: Option<String>,
    pub key_points: Vec<String>,
    pub details: Option<String>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    KeyPoints,
    Details,
    Other,
}

fn classify_heading(title: &str) -> Section {
    let title = title.trim().trim_matches('*').to_lowercase();
    if title.contains("key point") || title.contains("main point") {
        Section::KeyPoints
    } else if title.contains("summary") {
        Section::Summary
    } else if title.contains("detail") {
        Section::Details
    } else {
        Section::Other
    }
}

fn non_empty(lines: &[&str]) -> Option<String> {
    let text = lines.join("\n").trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Split a response into its sections, dropping any preamble before the
/// first `## ` heading.
pub fn parse_response(raw: &str) -> AnalysisText {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines
        .iter()
        .position(|l| l.trim_start().starts_with("## "))
        .unwrap_or(0);
    let body = &lines[start..];

    let mut summary = Vec::new();
    let mut key_points = Vec::new();
    let mut details = Vec::new();
    let mut current = Section::Other;

    for line in body {
        if let Some(title) = line.trim_start().strip_prefix("## ") {
            current = classify_heading(title);
            continue;
        }
        match current {
            Section::Summary => summary.push(*line),
            Section::KeyPoints => {
                let item = line.trim();
                let item = item
                    .strip_prefix("- ")
                    .or_else(|| item.strip_prefix("* "))
                    .or_else(|| item.strip_prefix("• "))
                    .unwrap_or_else(|| strip_ordinal(item));
                if !item.is_empty() {
                    key_points.push(item.to_string());
                }
            }
            Section::Details => details.push(*line),
            Section::Other => {}
        }
    }

    AnalysisText {
        raw: raw.to_string(),
        markdown: body.join("\n").trim().to_string(),
        summary: non_empty(&summary),
        key_points,
        details: non_empty(&details),
    }
}

fn strip_ordinal(item: &str) -> &str {
    match item.split_once(". ") {
        Some((n, rest)) if !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => item,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = "I'll look at the frames first.\n\n\
## Summary\nA cooking show about pasta.\n\n\
## Key Points\n- Boil water\n* Salt generously\n2. Stir often\n\n\
## Details\n- **Elements**: a chef\n";

    #[test]
    fn test_parse_drops_preamble() {
        let text = parse_response(RESPONSE);
        assert!(text.markdown.starts_with("## Summary"));
        assert_eq!(text.summary.as_deref(), Some("A cooking show about pasta."));
        assert_eq!(text.key_points, vec!["Boil water", "Salt generously", "Stir often"]);
        assert_eq!(text.details.as_deref(), Some("- **Elements**: a chef"));
        assert_eq!(text.raw, RESPONSE);
    }

    #[test]
    fn test_parse_without_headings_keeps_text() {
        let text = parse_response("Just a paragraph.\n");
        assert_eq!(text.markdown, "Just a paragraph.");
        assert_eq!(text.summary, None);
        assert!(text.key_points.is_empty());
    }

    #[test]
    fn test_prompt_contents() {
        let plan = ExtractionPlan::fixed_interval(5, 180);
        let prompt = build_prompt(&PromptContext {
            plan: &plan,
            frame_count: 180,
            duration_seconds: 900.0,
            language: Language::Japanese,
            custom_prompt: Some("  focus on the speaker "),
        });
        assert!(prompt.contains("180 frames"));
        assert!(prompt.contains("15:00"));
        assert!(prompt.contains(HEADING_KEY_POINTS));
        assert!(prompt.contains(Language::Japanese.instruction()));
        assert!(prompt.ends_with("focus on the speaker"));

        let auto = build_prompt(&PromptContext {
            plan: &plan,
            frame_count: 1,
            duration_seconds: 10.0,
            language: Language::Auto,
            custom_prompt: None,
        });
        assert!(!auto.contains("Additional request"));
    }
}
