//! ドキュメント生成の入出力型

use crate::error::GenerationError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// ドキュメント種別
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    MeetingMinutes,
    Letter,
    Report,
    Announcement,
    Flyer,
    Custom,
}

impl DocumentType {
    pub const ALL: [DocumentType; 6] = [
        DocumentType::MeetingMinutes,
        DocumentType::Letter,
        DocumentType::Report,
        DocumentType::Announcement,
        DocumentType::Flyer,
        DocumentType::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::MeetingMinutes => "meeting_minutes",
            DocumentType::Letter => "letter",
            DocumentType::Report => "report",
            DocumentType::Announcement => "announcement",
            DocumentType::Flyer => "flyer",
            DocumentType::Custom => "custom",
        }
    }

    /// 表示名（フォールバック時のタイトルに使う）
    pub fn display_name(self) -> &'static str {
        match self {
            DocumentType::MeetingMinutes => "Meeting Minutes",
            DocumentType::Letter => "Letter",
            DocumentType::Report => "Report",
            DocumentType::Announcement => "Announcement",
            DocumentType::Flyer => "Flyer",
            DocumentType::Custom => "Custom",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = GenerationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DocumentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| GenerationError::InvalidDocumentType(s.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLength {
    Short,
    Medium,
    Long,
}

impl TargetLength {
    pub fn instruction(self) -> &'static str {
        match self {
            TargetLength::Short => "Keep it concise and to the point",
            TargetLength::Medium => "Provide moderate detail and explanation",
            TargetLength::Long => "Include comprehensive details and explanations",
        }
    }
}

impl FromStr for TargetLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "short" => Ok(TargetLength::Short),
            "medium" => Ok(TargetLength::Medium),
            "long" => Ok(TargetLength::Long),
            other => Err(format!("未対応の長さ指定: {}", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormalityLevel {
    Casual,
    Formal,
    Professional,
}

impl FormalityLevel {
    pub fn instruction(self) -> &'static str {
        match self {
            FormalityLevel::Casual => "Use conversational, friendly language",
            FormalityLevel::Formal => "Use formal, traditional business language",
            FormalityLevel::Professional => "Use professional, clear, and direct language",
        }
    }
}

impl FromStr for FormalityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "casual" => Ok(FormalityLevel::Casual),
            "formal" => Ok(FormalityLevel::Formal),
            "professional" => Ok(FormalityLevel::Professional),
            other => Err(format!("未対応の文体指定: {}", other)),
        }
    }
}

/// ドキュメント生成リクエスト
///
/// 不変の値オブジェクト。`with_*` で任意項目を設定する。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentGenerationRequest {
    pub transcription_text: String,
    pub document_type: DocumentType,
    pub template_id: Option<String>,
    pub custom_template: Option<String>,
    /// 順序を保つためにペアの列で持つ
    pub style_preferences: Vec<(String, String)>,
    pub additional_context: Map<String, Value>,
    pub target_length: Option<TargetLength>,
    pub formality_level: Option<FormalityLevel>,
}

impl DocumentGenerationRequest {
    pub fn new(transcription_text: impl Into<String>, document_type: DocumentType) -> Self {
        Self {
            transcription_text: transcription_text.into(),
            document_type,
            template_id: None,
            custom_template: None,
            style_preferences: Vec::new(),
            additional_context: Map::new(),
            target_length: None,
            formality_level: None,
        }
    }

    pub fn with_template_id(mut self, id: impl Into<String>) -> Self {
        self.template_id = Some(id.into());
        self
    }

    pub fn with_custom_template(mut self, markup: impl Into<String>) -> Self {
        self.custom_template = Some(markup.into());
        self
    }

    pub fn with_style_preference(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.style_preferences.push((key.into(), value.into()));
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_context.insert(key.into(), value);
        self
    }

    pub fn with_target_length(mut self, length: TargetLength) -> Self {
        self.target_length = Some(length);
        self
    }

    pub fn with_formality(mut self, level: FormalityLevel) -> Self {
        self.formality_level = Some(level);
        self
    }

    /// テンプレートが明示的に指定されているか
    pub fn has_explicit_template(&self) -> bool {
        self.template_id.is_some() || self.custom_template.is_some()
    }

    /// 文体指示を組み立てる
    ///
    /// 長さ・文体の指示と呼び出し元の指定を "; " でつなぐ。
    /// どれもなければ既定の指示を返す。
    pub fn style_instructions(&self) -> String {
        let mut instructions: Vec<String> = Vec::new();
        if let Some(length) = self.target_length {
            instructions.push(length.instruction().to_string());
        }
        if let Some(level) = self.formality_level {
            instructions.push(level.instruction().to_string());
        }
        for (key, value) in &self.style_preferences {
            instructions.push(format!("{}: {}", key, value));
        }

        if instructions.is_empty() {
            "Use clear, professional language".to_string()
        } else {
            instructions.join("; ")
        }
    }
}

/// 見出しと本文
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub content: String,
}

impl Section {
    pub fn new(heading: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            heading: heading.into(),
            content: content.into(),
        }
    }
}

/// 構造化コンテンツ
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredContent {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub template_variables: Map<String, Value>,
}

impl StructuredContent {
    /// セクション本文を空行区切りで連結したプレーンテキスト
    pub fn plain_content(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// トランスクリプトの分析結果
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptAnalysis {
    #[serde(default)]
    pub main_topics: Vec<String>,
    #[serde(default)]
    pub participants: Vec<String>,
    #[serde(default)]
    pub dates_times: Vec<String>,
    #[serde(default)]
    pub action_items: Vec<String>,
    #[serde(default)]
    pub contact_info: Vec<String>,
    #[serde(default)]
    pub tone: String,
    #[serde(default)]
    pub structure_suggestions: Vec<String>,
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub document_title_suggestions: Vec<String>,
}

/// ステージの出力
///
/// 外部ケイパビリティから得た値か、決定的なフォールバック値かを区別する。
#[derive(Clone, Debug, PartialEq)]
pub enum StageOutput<T> {
    Capability(T),
    Fallback { value: T, reason: String },
}

impl<T> StageOutput<T> {
    pub fn value(&self) -> &T {
        match self {
            StageOutput::Capability(value) => value,
            StageOutput::Fallback { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            StageOutput::Capability(value) => value,
            StageOutput::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, StageOutput::Fallback { .. })
    }
}

/// ドキュメント生成の最終結果
///
/// 呼び出し元が所有し、内部には保持しない。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DocumentGenerationResult {
    pub document_content: String,
    pub formatted_content: String,
    pub metadata: Map<String, Value>,
    pub quality_score: f64,
    pub suggestions: Vec<String>,
    pub template_variables: Map<String, Value>,
    pub sections: Vec<Section>,
}
