//! 文字起こしからドキュメントを生成する4ステージのパイプライン
//!
//! 分析 → 構造化コンテンツ生成 → テンプレート適用 → 後処理 の順に実行する。
//! 各ステージの外部呼び出しは1回だけ試み、失敗時は決定的なフォールバックに切り替える。
//! 呼び出し元へ返るエラーは入力不正だけ。

use crate::analysis;
use crate::config::LlmConfig;
use crate::document::{
    DocumentGenerationRequest, DocumentGenerationResult, DocumentType, Section, StageOutput,
    StructuredContent, TranscriptAnalysis,
};
use crate::document_scoring;
use crate::error::{GenerationError, TemplateError};
use crate::template::TemplateEngine;
use crate::template_store::TemplateStore;
use crate::text;
use crate::text_generator::TextGenerator;
use chrono::{Local, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const PROCESSING_VERSION: &str = "2.0";

/// 1分あたりの想定読書語数
const WORDS_PER_MINUTE: usize = 200;

const STAGE_ANALYSIS: &str = "analysis";
const STAGE_GENERATION: &str = "generation";
const STAGE_TEMPLATE: &str = "template";

const CONTENT_SCHEMA: &str = r#"{
  "title": "Document title",
  "sections": [
    {"heading": "Section heading", "content": "Section content"}
  ],
  "metadata": {
    "word_count": 123,
    "estimated_reading_time": "2 minutes",
    "formality_level": "professional"
  },
  "template_variables": {"variable_name": "value"}
}"#;

/// 文書種別ごとの生成指示
fn document_instructions(document_type: DocumentType) -> &'static str {
    match document_type {
        DocumentType::MeetingMinutes => {
            "Create professional meeting minutes. Include the meeting title, date and attendees, \
             the agenda, key discussion points and decisions, action items with owners and due \
             dates, and next steps."
        }
        DocumentType::Letter => {
            "Write a well-formed letter with a header, an appropriate salutation, clear body \
             paragraphs, a courteous closing and a signature block."
        }
        DocumentType::Report => {
            "Write a structured report with an executive summary, organized sections, key \
             findings, analysis and conclusions with recommendations."
        }
        DocumentType::Announcement => {
            "Write an announcement with a clear headline that states what, when, where and who, \
             followed by a call to action and contact information."
        }
        DocumentType::Flyer => {
            "Write flyer copy with an attention-grabbing headline, key details, date, time and \
             location, the main benefits, a call to action and contact information."
        }
        DocumentType::Custom => {
            "Organize the content into a clear document with a logical structure and descriptive \
             section headings."
        }
    }
}

fn generation_prompt(request: &DocumentGenerationRequest, analysis: &TranscriptAnalysis) -> String {
    let analysis_json = serde_json::to_string_pretty(analysis).unwrap_or_default();
    format!(
        "{instructions}\n\nSource transcription:\n{transcript}\n\nAnalysis results:\n{analysis}\n\n\
         Style requirements:\n{style}\n\n\
         Generate a well-structured {doc_type} and return it as a JSON object with this structure:\n{schema}",
        instructions = document_instructions(request.document_type),
        transcript = request.transcription_text,
        analysis = analysis_json,
        style = request.style_instructions(),
        doc_type = request.document_type.as_str(),
        schema = CONTENT_SCHEMA,
    )
}

/// テキスト生成の応答から JSON を取り出す
///
/// 応答全体、```json フェンス内、最初の `{` から最後の `}` までの順に試す。
pub fn extract_json<T: DeserializeOwned>(body: &str) -> Option<T> {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```json") {
        let inner = &trimmed[start + "```json".len()..];
        if let Some(end) = inner.find("```") {
            if let Ok(value) = serde_json::from_str(inner[..end].trim()) {
                return Some(value);
            }
        }
    }

    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str(&trimmed[open..=close]).ok()
}

/// 生成ステージのフォールバック（文字起こしをそのまま1セクションにする）
pub fn fallback_content(request: &DocumentGenerationRequest) -> StructuredContent {
    let transcript = &request.transcription_text;
    let words = text::word_count(transcript);
    let minutes = (words / WORDS_PER_MINUTE).max(1);

    let mut metadata = Map::new();
    metadata.insert("word_count".to_string(), json!(words));
    metadata.insert(
        "estimated_reading_time".to_string(),
        json!(format!("{} minutes", minutes)),
    );
    metadata.insert("formality_level".to_string(), json!("professional"));

    let title = format!("{} Document", request.document_type.display_name());

    let mut template_variables = Map::new();
    template_variables.insert("title".to_string(), json!(title));
    template_variables.insert("content".to_string(), json!(transcript));
    template_variables.insert(
        "date".to_string(),
        json!(Local::now().format("%B %d, %Y").to_string()),
    );

    StructuredContent {
        title,
        sections: vec![Section::new("Content", transcript.clone())],
        metadata,
        template_variables,
    }
}

/// テンプレートが使えない場合の最小限の整形
pub fn basic_format(content: &StructuredContent) -> String {
    let mut lines = vec![format!("# {}", content.title), String::new()];
    for section in &content.sections {
        if !section.heading.is_empty() {
            lines.push(format!("## {}", section.heading));
            lines.push(String::new());
        }
        lines.push(section.content.clone());
        lines.push(String::new());
    }
    lines.join("\n")
}

/// テンプレートに渡す変数
///
/// title と sections を基本に、生成結果の変数、呼び出し元の追加情報の順で上書きする。
pub fn template_variables(
    request: &DocumentGenerationRequest,
    content: &StructuredContent,
) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("title".to_string(), json!(content.title));
    vars.insert(
        "sections".to_string(),
        serde_json::to_value(&content.sections).unwrap_or(Value::Array(Vec::new())),
    );
    for (key, value) in content
        .template_variables
        .iter()
        .chain(request.additional_context.iter())
    {
        vars.insert(key.clone(), value.clone());
    }
    vars
}

/// ドキュメント生成パイプライン
pub struct DocumentProcessor {
    generator: Arc<dyn TextGenerator>,
    templates: Arc<dyn TemplateStore>,
    engine: TemplateEngine,
    llm: LlmConfig,
}

impl DocumentProcessor {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        templates: Arc<dyn TemplateStore>,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            generator,
            templates,
            engine: TemplateEngine::new(),
            llm: llm.clone(),
        }
    }

    /// 4ステージを順に実行する
    ///
    /// 外部ケイパビリティが全て失敗しても結果を返す。
    pub async fn generate_document(
        &self,
        request: &DocumentGenerationRequest,
    ) -> Result<DocumentGenerationResult, GenerationError> {
        if request.transcription_text.trim().is_empty() {
            return Err(GenerationError::EmptyTranscript);
        }

        log::info!(
            "ドキュメント生成開始: 種別 {}, 文字起こし {}文字",
            request.document_type,
            request.transcription_text.chars().count()
        );

        let mut fallback_stages: Vec<&str> = Vec::new();

        let analysis = self.analyze(request).await;
        if analysis.is_fallback() {
            fallback_stages.push(STAGE_ANALYSIS);
        }

        let content = self.generate_content(request, analysis.value()).await;
        if content.is_fallback() {
            fallback_stages.push(STAGE_GENERATION);
        }
        let content = content.into_value();

        let variables = template_variables(request, &content);
        let formatted = self.apply_template(request, &content, &variables);
        let rendered_with_template = !formatted.is_fallback();
        if formatted.is_fallback() {
            fallback_stages.push(STAGE_TEMPLATE);
        }
        let formatted_content = formatted.into_value();

        let template_used = request.has_explicit_template() && rendered_with_template;
        let result = self.post_process(
            request,
            content,
            formatted_content,
            variables,
            template_used,
            &fallback_stages,
        );

        log::info!(
            "ドキュメント生成完了: スコア {:.2}, フォールバック {:?}",
            result.quality_score,
            fallback_stages
        );
        Ok(result)
    }

    /// 第1ステージ: 分析
    async fn analyze(&self, request: &DocumentGenerationRequest) -> StageOutput<TranscriptAnalysis> {
        let prompt = analysis::analysis_prompt(&request.transcription_text, request.document_type);
        let reason = match self
            .generator
            .generate(&prompt, self.llm.analysis_temperature, self.llm.analysis_max_tokens)
            .await
        {
            Ok(body) => match extract_json::<TranscriptAnalysis>(&body) {
                Some(analysis) => return StageOutput::Capability(analysis),
                None => "分析結果の JSON を抽出できません".to_string(),
            },
            Err(e) => e.to_string(),
        };

        log::warn!(
            "[{}] 簡易抽出にフォールバック ({}文字): {}",
            STAGE_ANALYSIS,
            request.transcription_text.chars().count(),
            reason
        );
        StageOutput::Fallback {
            value: analysis::fallback_analysis(&request.transcription_text, request.document_type),
            reason,
        }
    }

    /// 第2ステージ: 構造化コンテンツ生成
    async fn generate_content(
        &self,
        request: &DocumentGenerationRequest,
        analysis: &TranscriptAnalysis,
    ) -> StageOutput<StructuredContent> {
        let prompt = generation_prompt(request, analysis);
        let reason = match self
            .generator
            .generate(&prompt, self.llm.generation_temperature, self.llm.generation_max_tokens)
            .await
        {
            Ok(body) => match extract_json::<StructuredContent>(&body) {
                Some(content) if !content.sections.is_empty() => {
                    return StageOutput::Capability(content)
                }
                Some(_) => "生成結果にセクションがありません".to_string(),
                None => "生成結果の JSON を抽出できません".to_string(),
            },
            Err(e) => e.to_string(),
        };

        log::warn!(
            "[{}] 文字起こしをそのまま使用 (種別 {}): {}",
            STAGE_GENERATION,
            request.document_type,
            reason
        );
        StageOutput::Fallback {
            value: fallback_content(request),
            reason,
        }
    }

    /// 描画に使うマークアップを選ぶ（カスタム > ID 指定 > 種別の既定）
    fn select_markup(&self, request: &DocumentGenerationRequest) -> Result<String, TemplateError> {
        if let Some(custom) = &request.custom_template {
            return Ok(custom.clone());
        }
        let template = match &request.template_id {
            Some(id) => self.templates.get_template(id)?,
            None => self.templates.get_default_template(request.document_type)?,
        };
        Ok(template.styled_markup())
    }

    /// 第3ステージ: テンプレート適用
    fn apply_template(
        &self,
        request: &DocumentGenerationRequest,
        content: &StructuredContent,
        variables: &Map<String, Value>,
    ) -> StageOutput<String> {
        let rendered = self
            .select_markup(request)
            .and_then(|markup| self.engine.render(&markup, variables));

        match rendered {
            Ok(formatted) => StageOutput::Capability(formatted),
            Err(e) => {
                log::warn!(
                    "[{}] 簡易整形にフォールバック (テンプレート {:?}): {}",
                    STAGE_TEMPLATE,
                    request
                        .template_id
                        .as_deref()
                        .or(request.custom_template.as_ref().map(|_| "custom")),
                    e
                );
                StageOutput::Fallback {
                    value: basic_format(content),
                    reason: e.to_string(),
                }
            }
        }
    }

    /// 第4ステージ: スコアリングとメタデータの付与
    fn post_process(
        &self,
        request: &DocumentGenerationRequest,
        content: StructuredContent,
        formatted_content: String,
        template_variables: Map<String, Value>,
        template_used: bool,
        fallback_stages: &[&str],
    ) -> DocumentGenerationResult {
        let quality_score =
            document_scoring::quality_score(&content, &formatted_content, request, template_used);
        let suggestions =
            document_scoring::suggestions(&content, &formatted_content, request.document_type);

        let mut metadata = content.metadata.clone();
        metadata.insert(
            "generation_timestamp".to_string(),
            json!(Utc::now().to_rfc3339()),
        );
        metadata.insert("document_type".to_string(), json!(request.document_type.as_str()));
        metadata.insert("template_used".to_string(), json!(template_used));
        metadata.insert("processing_version".to_string(), json!(PROCESSING_VERSION));
        metadata.insert("fallback_stages".to_string(), json!(fallback_stages));

        DocumentGenerationResult {
            document_content: content.plain_content(),
            formatted_content,
            metadata,
            quality_score,
            suggestions,
            template_variables,
            sections: content.sections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::template_store::BuiltinTemplateStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    const TRANSCRIPT: &str = "Team meeting about Q3 roadmap. John will send the budget by Friday.";

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _: &str, _: f32, _: u32) -> Result<String, CapabilityError> {
            Err(CapabilityError::RequestFailed("connection refused".to_string()))
        }
    }

    /// 用意した応答を順に返す
    struct ScriptedGenerator {
        responses: Mutex<VecDeque<String>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(responses: &[&str]) -> Self {
            Self {
                responses: Mutex::new(responses.iter().map(|r| r.to_string()).collect()),
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _: f32, _: u32) -> Result<String, CapabilityError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| CapabilityError::RequestFailed("no more responses".to_string()))
        }
    }

    fn processor(generator: Arc<dyn TextGenerator>) -> DocumentProcessor {
        DocumentProcessor::new(
            generator,
            Arc::new(BuiltinTemplateStore::new()),
            &LlmConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_total_outage_still_produces_document() {
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::MeetingMinutes);
        let result = processor(Arc::new(FailingGenerator))
            .generate_document(&request)
            .await
            .unwrap();

        assert!(result.document_content.contains(TRANSCRIPT));
        assert!(result.formatted_content.contains(TRANSCRIPT));
        assert_eq!(result.metadata["word_count"], json!(12));
        assert_eq!(result.metadata["estimated_reading_time"], json!("1 minutes"));
        assert_eq!(result.metadata["fallback_stages"], json!(["analysis", "generation"]));
        assert_eq!(result.metadata["template_used"], json!(false));
        assert_eq!(result.metadata["processing_version"], json!("2.0"));
        assert_eq!(result.metadata["document_type"], json!("meeting_minutes"));
        assert!(!result.sections.is_empty());
        assert!(result.quality_score >= 0.0);
        assert!(result
            .suggestions
            .iter()
            .any(|s| s.contains("action items")));
        assert_eq!(result.template_variables["title"], json!("Meeting Minutes Document"));
    }

    #[tokio::test]
    async fn test_empty_transcript_is_fatal() {
        let request = DocumentGenerationRequest::new("   \n", DocumentType::Report);
        let result = processor(Arc::new(FailingGenerator)).generate_document(&request).await;
        assert!(matches!(result, Err(GenerationError::EmptyTranscript)));
    }

    #[tokio::test]
    async fn test_capability_content_and_variable_precedence() {
        let analysis = "Here you go:\n```json\n{\"main_topics\": [\"roadmap\"], \"tone\": \"casual\"}\n```";
        let content = r#"Sure! {"title": "Q3 Roadmap Sync",
            "sections": [
                {"heading": "Discussion", "content": "Roadmap review."},
                {"heading": "Action Items", "content": "John sends the budget."}
            ],
            "metadata": {"formality_level": "casual"},
            "template_variables": {"date": "March 1, 2024", "owner": "llm"}} Thanks."#;
        let generator = Arc::new(ScriptedGenerator::new(&[analysis, content]));
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::MeetingMinutes)
            .with_context("owner", json!("caller"));

        let result = processor(generator.clone()).generate_document(&request).await.unwrap();

        assert_eq!(result.metadata["fallback_stages"], json!([]));
        assert_eq!(result.metadata["formality_level"], json!("casual"));
        assert_eq!(result.sections.len(), 2);
        assert_eq!(result.document_content, "Roadmap review.\n\nJohn sends the budget.");
        assert!(result.formatted_content.starts_with("# Q3 Roadmap Sync\n\nDate: March 1, 2024\n"));
        assert!(result.formatted_content.contains("## Action Items"));
        assert_eq!(result.template_variables["owner"], json!("caller"));
        assert!(!result.suggestions.iter().any(|s| s.contains("action items")));

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].contains("\"roadmap\""));
        assert!(prompts[1].contains("Use clear, professional language"));
    }

    #[tokio::test]
    async fn test_empty_sections_use_fallback() {
        let generator = Arc::new(ScriptedGenerator::new(&["{}", r#"{"title": "x", "sections": []}"#]));
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::Report);
        let result = processor(generator).generate_document(&request).await.unwrap();
        assert_eq!(result.metadata["fallback_stages"], json!(["generation"]));
        assert_eq!(result.sections, vec![Section::new("Content", TRANSCRIPT)]);
    }

    #[tokio::test]
    async fn test_broken_custom_template_falls_back_to_basic_format() {
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::Report)
            .with_custom_template("{% for x in %}");
        let result = processor(Arc::new(FailingGenerator))
            .generate_document(&request)
            .await
            .unwrap();

        assert_eq!(
            result.formatted_content,
            format!("# Report Document\n\n## Content\n\n{}\n", TRANSCRIPT)
        );
        assert_eq!(
            result.metadata["fallback_stages"],
            json!(["analysis", "generation", "template"])
        );
        assert_eq!(result.metadata["template_used"], json!(false));
    }

    #[tokio::test]
    async fn test_explicit_template_id_is_used() {
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::MeetingMinutes)
            .with_template_id("meeting_minimal_ja")
            .with_context("meeting_title", json!("定例会議"));
        let result = processor(Arc::new(FailingGenerator))
            .generate_document(&request)
            .await
            .unwrap();

        assert_eq!(result.metadata["template_used"], json!(true));
        assert!(result.formatted_content.starts_with("<style>"));
        assert!(result.formatted_content.contains("<h1>定例会議</h1>"));
    }

    #[tokio::test]
    async fn test_unknown_template_id_falls_back() {
        let request = DocumentGenerationRequest::new(TRANSCRIPT, DocumentType::Letter)
            .with_template_id("missing");
        let result = processor(Arc::new(FailingGenerator))
            .generate_document(&request)
            .await
            .unwrap();
        assert_eq!(result.metadata["template_used"], json!(false));
        assert!(result.formatted_content.starts_with("# Letter Document"));
    }

    #[test]
    fn test_extract_json_variants() {
        let direct: Value = extract_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(direct["a"], 1);
        let fenced: Value = extract_json("text\n```json\n{\"a\": 2}\n```\nmore").unwrap();
        assert_eq!(fenced["a"], 2);
        let embedded: Value = extract_json("prefix {\"a\": {\"b\": 3}} suffix").unwrap();
        assert_eq!(embedded["a"]["b"], 3);
        assert!(extract_json::<Value>("no json here").is_none());
        assert!(extract_json::<Value>("} backwards {").is_none());
    }

    #[test]
    fn test_basic_format_skips_empty_headings() {
        let content = StructuredContent {
            title: "T".to_string(),
            sections: vec![Section::new("A", "one"), Section::new("", "two")],
            ..StructuredContent::default()
        };
        assert_eq!(basic_format(&content), "# T\n\n## A\n\none\n\ntwo\n");
    }

    #[test]
    fn test_fallback_content_reading_time() {
        let long = "word ".repeat(450);
        let request = DocumentGenerationRequest::new(long, DocumentType::Custom);
        let content = fallback_content(&request);
        assert_eq!(content.metadata["word_count"], json!(450));
        assert_eq!(content.metadata["estimated_reading_time"], json!("2 minutes"));
        assert_eq!(content.title, "Custom Document");
    }
}
