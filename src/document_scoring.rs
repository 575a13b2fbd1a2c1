//! 生成ドキュメントの品質スコアと改善提案（第4ステージ）

use crate::document::{DocumentGenerationRequest, DocumentType, StructuredContent};
use crate::text;
use std::collections::HashSet;

/// 品質スコアを計算する
///
/// 網羅性 (0.3)・語数 (0.2)・構造 (0.25)・テンプレート使用 (0.15)・
/// 内容の関連性 (0.1) の合計を [0, 1] にクランプする。
pub fn quality_score(
    content: &StructuredContent,
    formatted_content: &str,
    request: &DocumentGenerationRequest,
    template_used: bool,
) -> f64 {
    let mut score: f64 = 0.0;

    let sections = content.sections.len();
    score += match sections {
        n if n >= 3 => 0.3,
        2 => 0.2,
        1 => 0.1,
        _ => 0.0,
    };

    let words = text::word_count(formatted_content);
    score += if (100..=2000).contains(&words) {
        0.2
    } else if (50..100).contains(&words) || (2000..=3000).contains(&words) {
        0.15
    } else {
        0.1
    };

    if !content.title.trim().is_empty() {
        score += 0.1;
    }
    if sections > 0 && content.sections.iter().all(|s| !s.heading.trim().is_empty()) {
        score += 0.15;
    }

    score += if template_used { 0.15 } else { 0.05 };

    let overlap = token_overlap(&request.transcription_text, formatted_content);
    if overlap > 0.3 {
        score += 0.1;
    } else if overlap > 0.1 {
        score += 0.05;
    }

    score.clamp(0.0, 1.0)
}

/// トランスクリプトの語のうち、生成結果に含まれる割合
fn token_overlap(transcript: &str, rendered: &str) -> f64 {
    let transcript_lower = transcript.to_lowercase();
    let rendered_lower = rendered.to_lowercase();
    let source: HashSet<&str> = text::tokens(&transcript_lower).into_iter().collect();
    if source.is_empty() {
        return 0.0;
    }
    let target: HashSet<&str> = text::tokens(&rendered_lower).into_iter().collect();
    source.intersection(&target).count() as f64 / source.len() as f64
}

/// 改善提案を生成する
pub fn suggestions(
    content: &StructuredContent,
    formatted_content: &str,
    document_type: DocumentType,
) -> Vec<String> {
    let mut suggestions = Vec::new();

    let words = text::word_count(formatted_content);
    if words < 50 {
        suggestions.push(
            "Consider adding more detail to make the document more comprehensive".to_string(),
        );
    } else if words > 2000 {
        suggestions.push("Consider condensing the content for better readability".to_string());
    }

    if content.sections.len() < 2 {
        suggestions.push("Add more sections to improve document structure".to_string());
    }

    match document_type {
        DocumentType::MeetingMinutes => {
            let has_actions = content.sections.iter().any(|s| {
                let heading = s.heading.to_lowercase();
                heading.contains("action") || s.heading.contains("アクション")
            });
            if !has_actions {
                suggestions.push("Consider adding an action items section".to_string());
            }
        }
        DocumentType::Letter => {
            let lower = formatted_content.to_lowercase();
            if !(lower.contains("dear") || lower.contains("hello") || formatted_content.contains("拝啓")) {
                suggestions.push("Consider adding a proper salutation".to_string());
            }
        }
        _ => {}
    }

    suggestions
}
