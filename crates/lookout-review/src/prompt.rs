use lookout_core::{FileDiff, GeneratedReview, NewReviewComment, PullRequestMeta, ResponseFormat};
use serde_json::{Map, Value};

/// Summary used when the model text is not a JSON object.
pub const UNPARSEABLE_SUMMARY: &str = "Unable to parse LLM response.";
/// Summary used when the model omits the `summary` key.
pub const DEFAULT_SUMMARY: &str = "Review completed.";

const SYSTEM_PROMPT: &str = "You are a precise code review assistant.";

const INSTRUCTIONS: &str = "\
You are an expert code reviewer. Review the pull request diff and return a JSON object \
with a concise summary and a list of comments. Focus on correctness, security, \
performance, and maintainability. Avoid style-only notes unless they prevent bugs.";

const SCHEMA_HINT: &str = r#"Return JSON with this schema:
{
  "summary": "string",
  "comments": [
    {"file_path": "string", "line_start": int, "line_end": int, "message": "string", "severity": "info|warning|critical"}
  ]
}"#;

const NO_DIFF: &str = "(no diff)";

/// Build the system prompt establishing the reviewer persona.
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Build the user prompt embedding the PR and its changed files.
///
/// # Examples
///
/// ```
/// use lookout_core::{FileDiff, FileStatus, PullRequestMeta};
/// use lookout_review::prompt::build_review_prompt;
///
/// let pr = PullRequestMeta { title: "Fix login".into(), ..Default::default() };
/// let files = vec![FileDiff {
///     path: "src/auth.rs".into(),
///     status: FileStatus::Modified,
///     patch: Some("+check()".into()),
/// }];
/// let prompt = build_review_prompt(&pr, &files);
/// assert!(prompt.contains("Title: Fix login"));
/// assert!(prompt.contains("Description: N/A"));
/// assert!(prompt.contains("File: src/auth.rs\nStatus: modified\nPatch:\n+check()"));
/// ```
pub fn build_review_prompt(pr: &PullRequestMeta, files: &[FileDiff]) -> String {
    let description = pr
        .body
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or("N/A");

    let file_blocks: Vec<String> = files
        .iter()
        .map(|file| {
            format!(
                "File: {}\nStatus: {}\nPatch:\n{}\n",
                file.path,
                file.status,
                file.patch.as_deref().filter(|p| !p.is_empty()).unwrap_or(NO_DIFF)
            )
        })
        .collect();

    format!(
        "{INSTRUCTIONS}\n\nTitle: {}\nDescription: {description}\n\n{SCHEMA_HINT}\n\nDiffs:\n{}",
        pr.title,
        file_blocks.join("\n")
    )
}

/// The `response_format` object sent with the chat completion request.
pub fn response_format(kind: ResponseFormat) -> Value {
    match kind {
        ResponseFormat::JsonObject => serde_json::json!({ "type": "json_object" }),
        ResponseFormat::JsonSchema => serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": "code_review",
                "strict": true,
                "schema": {
                    "type": "object",
                    "additionalProperties": false,
                    "required": ["summary", "comments"],
                    "properties": {
                        "summary": { "type": "string" },
                        "comments": {
                            "type": "array",
                            "items": {
                                "type": "object",
                                "additionalProperties": false,
                                "required": ["file_path", "line_start", "line_end", "message", "severity"],
                                "properties": {
                                    "file_path": { "type": "string" },
                                    "line_start": { "type": "integer" },
                                    "line_end": { "type": "integer" },
                                    "message": { "type": "string" },
                                    "severity": { "type": "string", "enum": ["info", "warning", "critical"] }
                                }
                            }
                        }
                    }
                }
            }
        }),
    }
}

/// Parse model output into a [`GeneratedReview`].
///
/// Never fails. Text that is not a JSON object degrades to
/// [`UNPARSEABLE_SUMMARY`] with no comments; a missing `summary` becomes
/// [`DEFAULT_SUMMARY`] and a missing `comments` becomes an empty list.
/// Individual comment fields are coerced as described on
/// [`normalize_comment`].
///
/// # Examples
///
/// ```
/// use lookout_review::prompt::parse_review_response;
///
/// let review = parse_review_response("not json");
/// assert_eq!(review.summary, "Unable to parse LLM response.");
/// assert!(review.comments.is_empty());
///
/// let review = parse_review_response(r#"{"summary":"LGTM"}"#);
/// assert_eq!(review.summary, "LGTM");
/// assert!(review.comments.is_empty());
/// ```
pub fn parse_review_response(response: &str) -> GeneratedReview {
    let cleaned = strip_code_fences(response);
    // An empty completion is treated as an empty object.
    let cleaned = if cleaned.is_empty() { "{}" } else { cleaned };

    let object = match serde_json::from_str::<Value>(cleaned) {
        Ok(Value::Object(object)) => object,
        Ok(_) | Err(_) => {
            tracing::warn!("model response is not a JSON object, using fallback summary");
            return GeneratedReview {
                summary: UNPARSEABLE_SUMMARY.to_string(),
                comments: Vec::new(),
            };
        }
    };

    let summary = object
        .get("summary")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_SUMMARY)
        .to_string();

    let comments = match object.get("comments") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .map(normalize_comment)
            .collect(),
        _ => Vec::new(),
    };

    GeneratedReview { summary, comments }
}

/// Coerce one raw model comment into a storable [`NewReviewComment`].
///
/// Missing or mistyped fields fall back to `"unknown"` for the path, `0`
/// for line numbers, an empty message and `info` severity. Line numbers
/// are truncated to non-negative integers and `line_end` is raised to
/// `line_start` when the model reports an inverted range.
pub fn normalize_comment(raw: &Map<String, Value>) -> NewReviewComment {
    let text = |key: &str| raw.get(key).and_then(Value::as_str);

    let line_start = coerce_line(raw.get("line_start"));
    let line_end = coerce_line(raw.get("line_end")).max(line_start);

    NewReviewComment {
        file_path: text("file_path").unwrap_or("unknown").to_string(),
        line_start,
        line_end,
        message: text("message").unwrap_or_default().to_string(),
        severity: text("severity")
            .and_then(|s| s.parse().ok())
            .unwrap_or_default(),
    }
}

fn coerce_line(value: Option<&Value>) -> u32 {
    let n = match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_u64().map(|u| i64::try_from(u).unwrap_or(i64::MAX)))
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    n.map(|n| n.clamp(0, i64::from(u32::MAX)) as u32)
        .unwrap_or(0)
}

fn strip_code_fences(s: &str) -> &str {
    let trimmed = s.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(inner) = rest.strip_suffix("```") {
            return inner.trim();
        }
    }
    trimmed
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookout_core::{FileStatus, Severity};

    fn pr(title: &str, body: Option<&str>) -> PullRequestMeta {
        PullRequestMeta {
            number: 1,
            title: title.into(),
            body: body.map(str::to_string),
            html_url: None,
        }
    }

    #[test]
    fn system_prompt_sets_persona() {
        assert!(build_system_prompt().contains("code review assistant"));
    }

    #[test]
    fn review_prompt_embeds_metadata_schema_and_files() {
        let files = vec![
            FileDiff {
                path: "src/db.rs".into(),
                status: FileStatus::Modified,
                patch: Some("@@ -1 +1 @@\n-a\n+b".into()),
            },
            FileDiff {
                path: "assets/logo.png".into(),
                status: FileStatus::Added,
                patch: None,
            },
        ];
        let prompt = build_review_prompt(&pr("Tune queries", Some("Adds an index.")), &files);
        assert!(prompt.contains("correctness, security"));
        assert!(prompt.contains("Title: Tune queries\nDescription: Adds an index."));
        assert!(prompt.contains("\"severity\": \"info|warning|critical\""));
        assert!(prompt.contains("File: src/db.rs\nStatus: modified\nPatch:\n@@ -1 +1 @@\n-a\n+b\n"));
        assert!(prompt.contains("File: assets/logo.png\nStatus: added\nPatch:\n(no diff)\n"));
        let src = prompt.find("src/db.rs").unwrap();
        let logo = prompt.find("assets/logo.png").unwrap();
        assert!(src < logo);
    }

    #[test]
    fn empty_patch_uses_placeholder() {
        let files = vec![FileDiff {
            path: "docs/empty.md".into(),
            status: FileStatus::Added,
            patch: Some(String::new()),
        }];
        let prompt = build_review_prompt(&pr("t", None), &files);
        assert!(prompt.contains("File: docs/empty.md\nStatus: added\nPatch:\n(no diff)\n"));
    }

    #[test]
    fn blank_description_uses_placeholder() {
        let prompt = build_review_prompt(&pr("t", Some("   ")), &[]);
        assert!(prompt.contains("Description: N/A"));
    }

    #[test]
    fn response_format_variants() {
        assert_eq!(response_format(ResponseFormat::JsonObject)["type"], "json_object");
        let schema = response_format(ResponseFormat::JsonSchema);
        assert_eq!(schema["type"], "json_schema");
        assert_eq!(schema["json_schema"]["strict"], true);
        let severities = &schema["json_schema"]["schema"]["properties"]["comments"]["items"]
            ["properties"]["severity"]["enum"];
        assert_eq!(severities, &serde_json::json!(["info", "warning", "critical"]));
    }

    #[test]
    fn invalid_json_falls_back_exactly() {
        let review = parse_review_response("{not json");
        assert_eq!(
            review,
            GeneratedReview {
                summary: UNPARSEABLE_SUMMARY.into(),
                comments: vec![],
            }
        );
    }

    #[test]
    fn non_object_json_falls_back() {
        let review = parse_review_response("[1, 2, 3]");
        assert_eq!(review.summary, UNPARSEABLE_SUMMARY);
        assert!(review.comments.is_empty());
    }

    #[test]
    fn missing_comments_keeps_summary() {
        let review = parse_review_response(r#"{"summary": "Solid change."}"#);
        assert_eq!(review.summary, "Solid change.");
        assert!(review.comments.is_empty());
    }

    #[test]
    fn missing_summary_uses_default() {
        let review = parse_review_response(r#"{"comments": []}"#);
        assert_eq!(review.summary, DEFAULT_SUMMARY);
    }

    #[test]
    fn empty_completion_is_empty_object() {
        let review = parse_review_response("  ");
        assert_eq!(review.summary, DEFAULT_SUMMARY);
        assert!(review.comments.is_empty());
    }

    #[test]
    fn fenced_json_is_accepted() {
        let review = parse_review_response("```json\n{\"summary\":\"ok\",\"comments\":[]}\n```");
        assert_eq!(review.summary, "ok");
    }

    #[test]
    fn parses_well_formed_comments() {
        let review = parse_review_response(
            r#"{
                "summary": "One bug.",
                "comments": [
                    {"file_path": "src/auth.rs", "line_start": 42, "line_end": 44,
                     "message": "Token compared with ==", "severity": "critical"}
                ]
            }"#,
        );
        assert_eq!(
            review.comments,
            vec![NewReviewComment {
                file_path: "src/auth.rs".into(),
                line_start: 42,
                line_end: 44,
                message: "Token compared with ==".into(),
                severity: Severity::Critical,
            }]
        );
    }

    #[test]
    fn comment_fields_default_and_coerce() {
        let review = parse_review_response(
            r#"{"summary": "s", "comments": [
                {},
                {"file_path": 7, "line_start": "12", "line_end": 3.9, "severity": "WARNING"},
                {"file_path": "a.rs", "line_start": -5, "line_end": "x", "severity": "nit"},
                "not an object"
            ]}"#,
        );
        assert_eq!(review.comments.len(), 3);

        let empty = &review.comments[0];
        assert_eq!(empty.file_path, "unknown");
        assert_eq!((empty.line_start, empty.line_end), (0, 0));
        assert_eq!(empty.message, "");
        assert_eq!(empty.severity, Severity::Info);

        let coerced = &review.comments[1];
        assert_eq!(coerced.file_path, "unknown");
        assert_eq!((coerced.line_start, coerced.line_end), (12, 12));
        assert_eq!(coerced.severity, Severity::Warning);

        let negative = &review.comments[2];
        assert_eq!((negative.line_start, negative.line_end), (0, 0));
        assert_eq!(negative.severity, Severity::Info);
    }

    #[test]
    fn non_array_comments_become_empty() {
        let review = parse_review_response(r#"{"summary": "s", "comments": "none"}"#);
        assert!(review.comments.is_empty());
    }
}
