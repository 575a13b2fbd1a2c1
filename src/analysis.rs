//! トランスクリプト分析（第1ステージ）
//!
//! テキスト生成 API への分析プロンプトと、API が使えない場合の
//! 決定的な簡易抽出を提供する。

use crate::document::{DocumentType, TranscriptAnalysis};
use crate::text;
use regex_lite::Regex;

/// 簡易抽出で話題とみなすキーワード
const TOPIC_KEYWORDS: [&str; 5] = ["meeting", "project", "team", "discussion", "plan"];

const MAX_TOPICS: usize = 5;
const MAX_PARTICIPANTS: usize = 10;
const MAX_DATES: usize = 5;

/// 要点として切り出す先頭の文字数
const KEY_POINT_CHARS: usize = 200;

const DATE_PATTERNS: [&str; 3] = [
    r"\b\d{1,2}/\d{1,2}/\d{4}\b",
    r"\b\d{1,2}-\d{1,2}-\d{4}\b",
    r"\b[A-Za-z]+ \d{1,2}, \d{4}\b",
];

/// 分析プロンプト
pub fn analysis_prompt(transcript: &str, document_type: DocumentType) -> String {
    format!(
        r#"Analyze the following transcription and extract key information for generating a {doc_type}.

Transcription:
{transcript}

Return the analysis as a JSON object with exactly these fields:
{{
  "main_topics": [string],
  "participants": [string],
  "dates_times": [string],
  "action_items": [string],
  "contact_info": [string],
  "tone": "formal" | "casual" | "professional",
  "structure_suggestions": [string],
  "key_points": [string],
  "document_title_suggestions": [string]
}}"#,
        doc_type = document_type.as_str(),
        transcript = transcript
    )
}

/// パターンに一致する部分文字列をすべて返す
fn find_all(pattern: &str, text: &str) -> Vec<String> {
    match Regex::new(pattern) {
        Ok(re) => re.find_iter(text).map(|m| m.as_str().to_string()).collect(),
        Err(e) => {
            log::error!("正規表現のコンパイルに失敗: {} ({})", pattern, e);
            Vec::new()
        }
    }
}

/// キーワード一致による話題抽出
pub fn extract_topics(transcript: &str) -> Vec<String> {
    let lower = transcript.to_lowercase();
    let words: Vec<String> = find_all(r"\w+", &lower);
    TOPIC_KEYWORDS
        .iter()
        .filter(|k| words.iter().any(|w| w == *k))
        .take(MAX_TOPICS)
        .map(|k| k.to_string())
        .collect()
}

/// 大文字で始まる単語を参加者候補とする（初出順、重複なし）
pub fn extract_participants(transcript: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in find_all(r"\b[A-Z][a-z]+\b", transcript) {
        if !names.contains(&name) {
            names.push(name);
        }
        if names.len() >= MAX_PARTICIPANTS {
            break;
        }
    }
    names
}

/// 日付パターンの抽出
pub fn extract_dates(transcript: &str) -> Vec<String> {
    DATE_PATTERNS
        .iter()
        .flat_map(|p| find_all(p, transcript))
        .take(MAX_DATES)
        .collect()
}

/// API を使わない簡易分析
pub fn fallback_analysis(transcript: &str, document_type: DocumentType) -> TranscriptAnalysis {
    let (head, truncated) = text::truncate_chars(transcript, KEY_POINT_CHARS);
    let key_point = if truncated {
        format!("{}...", head)
    } else {
        head.to_string()
    };

    TranscriptAnalysis {
        main_topics: extract_topics(transcript),
        participants: extract_participants(transcript),
        dates_times: extract_dates(transcript),
        action_items: Vec::new(),
        contact_info: Vec::new(),
        tone: "professional".to_string(),
        structure_suggestions: vec![
            "Introduction".to_string(),
            "Main Content".to_string(),
            "Conclusion".to_string(),
        ],
        key_points: vec![key_point],
        document_title_suggestions: vec![format!("{} Document", document_type.display_name())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRANSCRIPT: &str = "Team meeting about Q3 roadmap. John will send the budget by Friday.";

    #[test]
    fn test_extract_topics() {
        assert_eq!(extract_topics(TRANSCRIPT), vec!["meeting", "team"]);
        assert!(extract_topics("nothing relevant").is_empty());
    }

    #[test]
    fn test_extract_participants_unique_in_order() {
        let names = extract_participants("Alice met Bob. Alice and Carol left. Q3 review");
        assert_eq!(names, vec!["Alice", "Bob", "Carol"]);
        assert_eq!(extract_participants(TRANSCRIPT), vec!["Team", "John", "Friday"]);
    }

    #[test]
    fn test_extract_participants_capped() {
        let text = "Aa Bb Cc Dd Ee Ff Gg Hh Ii Jj Kk Ll";
        assert_eq!(extract_participants(text).len(), MAX_PARTICIPANTS);
    }

    #[test]
    fn test_extract_dates() {
        let dates = extract_dates("Due 3/15/2024, review 04-01-2024 and launch on March 5, 2024.");
        assert_eq!(dates, vec!["3/15/2024", "04-01-2024", "March 5, 2024"]);
    }

    #[test]
    fn test_fallback_analysis() {
        let analysis = fallback_analysis(TRANSCRIPT, DocumentType::MeetingMinutes);
        assert_eq!(analysis.tone, "professional");
        assert_eq!(analysis.key_points, vec![TRANSCRIPT.to_string()]);
        assert_eq!(analysis.structure_suggestions.len(), 3);
        assert_eq!(
            analysis.document_title_suggestions,
            vec!["Meeting Minutes Document".to_string()]
        );
    }

    #[test]
    fn test_fallback_key_point_truncated() {
        let long = "word ".repeat(100);
        let analysis = fallback_analysis(&long, DocumentType::Report);
        let key_point = &analysis.key_points[0];
        assert!(key_point.ends_with("..."));
        assert_eq!(key_point.chars().count(), KEY_POINT_CHARS + 3);
    }

    #[test]
    fn test_analysis_prompt_mentions_type() {
        let prompt = analysis_prompt(TRANSCRIPT, DocumentType::Letter);
        assert!(prompt.contains("letter"));
        assert!(prompt.contains(TRANSCRIPT));
        assert!(prompt.contains("document_title_suggestions"));
    }
}
