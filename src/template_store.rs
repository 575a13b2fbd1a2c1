//! テンプレートの保管庫
//!
//! 文書種別ごとの既定テンプレートと、日本語向けのデザインテンプレートを持つ。
//! コアからは読み取り専用。

use crate::document::DocumentType;
use crate::error::TemplateError;
use serde::Serialize;

/// デザインの系統
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStyle {
    Standard,
    Professional,
    Modern,
    Formal,
    Creative,
    Minimal,
}

impl TemplateStyle {
    /// スタイルに対応する CSS
    pub fn css(self) -> &'static str {
        match self {
            TemplateStyle::Standard => "",
            TemplateStyle::Professional => CSS_PROFESSIONAL,
            TemplateStyle::Modern => CSS_MODERN,
            TemplateStyle::Formal => CSS_FORMAL,
            TemplateStyle::Creative => CSS_CREATIVE,
            TemplateStyle::Minimal => CSS_MINIMAL,
        }
    }
}

/// テンプレート定義
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub description: String,
    pub document_type: DocumentType,
    pub style: TemplateStyle,
    pub markup: String,
    /// 宣言された変数名
    pub variables: Vec<String>,
    pub category: String,
    pub tags: Vec<String>,
}

impl Template {
    pub fn new(
        id: impl Into<String>,
        document_type: DocumentType,
        markup: impl Into<String>,
        variables: &[&str],
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            document_type,
            style: TemplateStyle::Standard,
            markup: markup.into(),
            variables: variables.iter().map(|v| v.to_string()).collect(),
            category: String::new(),
            tags: Vec::new(),
        }
    }

    fn described(mut self, name: &str, description: &str, category: &str, tags: &[&str]) -> Self {
        self.name = name.to_string();
        self.description = description.to_string();
        self.category = category.to_string();
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    fn styled(mut self, style: TemplateStyle) -> Self {
        self.style = style;
        self
    }

    /// CSS を先頭に付けた完成形のマークアップ
    pub fn styled_markup(&self) -> String {
        format!("{}{}", self.style.css(), self.markup)
    }
}

/// テンプレートの取得口
pub trait TemplateStore: Send + Sync {
    fn get_template(&self, id: &str) -> Result<Template, TemplateError>;
    fn get_default_template(&self, document_type: DocumentType) -> Result<Template, TemplateError>;
}

/// 組み込みテンプレート
pub struct BuiltinTemplateStore {
    templates: Vec<Template>,
}

impl Default for BuiltinTemplateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BuiltinTemplateStore {
    pub fn new() -> Self {
        let mut templates: Vec<Template> = DocumentType::ALL.iter().map(|t| default_template(*t)).collect();
        templates.extend(japanese_templates());
        Self { templates }
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn templates_by_type(&self, document_type: DocumentType) -> Vec<&Template> {
        self.templates
            .iter()
            .filter(|t| t.document_type == document_type)
            .collect()
    }

    pub fn templates_by_style(&self, style: TemplateStyle) -> Vec<&Template> {
        self.templates.iter().filter(|t| t.style == style).collect()
    }
}

impl TemplateStore for BuiltinTemplateStore {
    fn get_template(&self, id: &str) -> Result<Template, TemplateError> {
        self.templates
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| TemplateError::NotFound(id.to_string()))
    }

    fn get_default_template(&self, document_type: DocumentType) -> Result<Template, TemplateError> {
        self.get_template(&default_id(document_type))
    }
}

fn default_id(document_type: DocumentType) -> String {
    format!("{}_default", document_type.as_str())
}

fn default_template(document_type: DocumentType) -> Template {
    let markup = match document_type {
        DocumentType::MeetingMinutes => MEETING_DEFAULT,
        DocumentType::Letter => LETTER_DEFAULT,
        DocumentType::Report => REPORT_DEFAULT,
        DocumentType::Announcement | DocumentType::Flyer => NOTICE_DEFAULT,
        DocumentType::Custom => GENERIC_DEFAULT,
    };
    Template::new(
        default_id(document_type),
        document_type,
        markup,
        &["title", "sections", "date"],
    )
    .described(
        &format!("{} (default)", document_type.display_name()),
        "Default structural layout",
        "default",
        &["default"],
    )
}

const MEETING_DEFAULT: &str = r#"# {{ title }}
{% if date %}

Date: {{ date }}
{% endif %}

{% for section in sections %}
## {{ section.heading | default("Notes") }}

{{ section.content }}

{% endfor %}
"#;

const LETTER_DEFAULT: &str = r#"{% if date %}
{{ date }}

{% endif %}
# {{ title }}

{% for section in sections %}
{{ section.content }}

{% endfor %}
"#;

const REPORT_DEFAULT: &str = r#"# {{ title }}

{% for section in sections %}
## {{ loop.index }}. {{ section.heading }}

{{ section.content }}

{% endfor %}
"#;

const NOTICE_DEFAULT: &str = r#"# {{ title | upper }}

{% for section in sections %}
{% if section.heading %}
### {{ section.heading }}

{% endif %}
{{ section.content }}

{% endfor %}
"#;

const GENERIC_DEFAULT: &str = r#"# {{ title }}

{% for section in sections %}
{% if section.heading %}
## {{ section.heading }}

{% endif %}
{{ section.content }}

{% endfor %}
"#;

const MEETING_VARS: [&str; 8] = [
    "meeting_title",
    "meeting_date",
    "attendees",
    "agenda_items",
    "discussion_points",
    "action_items",
    "next_meeting_date",
    "meeting_organizer",
];

fn japanese_templates() -> Vec<Template> {
    vec![
        Template::new("meeting_professional_ja", DocumentType::MeetingMinutes, MEETING_PROFESSIONAL_JA, &MEETING_VARS)
            .styled(TemplateStyle::Professional)
            .described(
                "会議議事録（プロフェッショナル）",
                "ビジネス会議に適したプロフェッショナルなデザイン",
                "会議・ミーティング",
                &["ビジネス", "プロフェッショナル", "標準"],
            ),
        Template::new("meeting_modern_ja", DocumentType::MeetingMinutes, MEETING_MODERN_JA, &MEETING_VARS)
            .styled(TemplateStyle::Modern)
            .described(
                "会議議事録（モダン）",
                "モダンで視覚的に魅力的なデザイン",
                "会議・ミーティング",
                &["モダン", "カラフル", "視覚的"],
            ),
        Template::new(
            "meeting_minimal_ja",
            DocumentType::MeetingMinutes,
            MEETING_MINIMAL_JA,
            &MEETING_VARS[..6],
        )
        .styled(TemplateStyle::Minimal)
        .described(
            "会議議事録（ミニマル）",
            "シンプルで読みやすいミニマルデザイン",
            "会議・ミーティング",
            &["ミニマル", "シンプル", "読みやすい"],
        ),
        Template::new(
            "letter_formal_ja",
            DocumentType::Letter,
            LETTER_FORMAL_JA,
            &[
                "sender_name",
                "sender_title",
                "sender_company",
                "recipient_name",
                "recipient_title",
                "recipient_company",
                "date",
                "subject",
                "body",
            ],
        )
        .styled(TemplateStyle::Formal)
        .described(
            "正式な手紙（フォーマル）",
            "正式なビジネス文書に適したクラシックなデザイン",
            "手紙・文書",
            &["フォーマル", "ビジネス", "正式"],
        ),
        Template::new(
            "letter_modern_ja",
            DocumentType::Letter,
            LETTER_MODERN_JA,
            &[
                "sender_name",
                "sender_company",
                "recipient_name",
                "recipient_company",
                "date",
                "subject",
                "body",
            ],
        )
        .styled(TemplateStyle::Modern)
        .described(
            "ビジネスレター（モダン）",
            "現代的なビジネスレターのデザイン",
            "手紙・文書",
            &["モダン", "ビジネス", "現代的"],
        ),
        Template::new(
            "report_professional_ja",
            DocumentType::Report,
            REPORT_PROFESSIONAL_JA,
            &[
                "report_title",
                "author",
                "date",
                "summary",
                "content_sections",
                "conclusions",
                "recommendations",
            ],
        )
        .styled(TemplateStyle::Professional)
        .described(
            "ビジネスレポート（プロフェッショナル）",
            "詳細なビジネスレポートに適したデザイン",
            "レポート・報告書",
            &["ビジネス", "分析", "プロフェッショナル"],
        ),
        Template::new(
            "report_creative_ja",
            DocumentType::Report,
            REPORT_CREATIVE_JA,
            &["report_title", "author", "date", "summary", "content_sections", "key_insights"],
        )
        .styled(TemplateStyle::Creative)
        .described(
            "クリエイティブレポート",
            "クリエイティブで印象的なレポートデザイン",
            "レポート・報告書",
            &["クリエイティブ", "印象的", "カラフル"],
        ),
        Template::new(
            "flyer_event_ja",
            DocumentType::Flyer,
            FLYER_EVENT_JA,
            &[
                "headline",
                "event_name",
                "event_date",
                "event_time",
                "location",
                "description",
                "contact_info",
                "call_to_action",
            ],
        )
        .styled(TemplateStyle::Modern)
        .described(
            "イベントフライヤー",
            "イベント告知に最適なデザイン",
            "フライヤー・チラシ",
            &["イベント", "告知", "カラフル"],
        ),
        Template::new(
            "flyer_business_ja",
            DocumentType::Flyer,
            FLYER_BUSINESS_JA,
            &[
                "company_name",
                "service_title",
                "service_description",
                "benefits",
                "contact_info",
                "call_to_action",
            ],
        )
        .styled(TemplateStyle::Professional)
        .described(
            "ビジネスフライヤー",
            "ビジネス向けのプロフェッショナルなフライヤー",
            "フライヤー・チラシ",
            &["ビジネス", "サービス", "プロフェッショナル"],
        ),
    ]
}

const MEETING_PROFESSIONAL_JA: &str = r#"<div class="date-header">{{ format_date(meeting_date, "%Y年%m月%d日") }}</div>
<h1>{{ meeting_title }}</h1>
<div class="card">
    <h2>📋 会議概要</h2>
    <p><strong>主催者：</strong>{{ meeting_organizer }}</p>
    <p><strong>出席者：</strong>
    {% for attendee in attendees %}
        {{ attendee }}{% if not loop.last %}, {% endif %}
    {% endfor %}
    </p>
</div>
<h2>📝 議題</h2>
<ol>
{% for item in agenda_items %}
    <li>{{ item }}</li>
{% endfor %}
</ol>
<h2>💬 討議内容</h2>
{{ discussion_points | markdown }}
<h2>✅ アクション項目</h2>
{% for action in action_items %}
<div class="card">
    <strong>{{ action.task }}</strong><br>
    担当者: {{ action.owner }}<br>
    期限: {{ format_date(action.due_date, "%m月%d日") if action.due_date else "未定" }}
</div>
{% endfor %}
<div class="footer">
    次回会議: {{ format_date(next_meeting_date, "%Y年%m月%d日") if next_meeting_date else "未定" }}
</div>
"#;

const MEETING_MODERN_JA: &str = r#"<div class="badge">{{ format_date(meeting_date, "%Y年%m月%d日") }}</div>
<h1>{{ meeting_title }}</h1>
<div class="card">
    <h2>📋 会議概要</h2>
    <p><strong>主催者：</strong>{{ meeting_organizer }}</p>
    <div>
    {% for attendee in attendees %}
        <span class="tag">{{ attendee }}</span>
    {% endfor %}
    </div>
</div>
<h2>📝 議題</h2>
<div class="card">
    <ol>
    {% for item in agenda_items %}
        <li>{{ item }}</li>
    {% endfor %}
    </ol>
</div>
<h2>💬 討議内容</h2>
<div class="card">
    {{ discussion_points | markdown }}
</div>
<h2>✅ アクション項目</h2>
{% for action in action_items %}
<div class="card accent">
    <strong>{{ action.task }}</strong><br>
    担当者: {{ action.owner }}<br>
    期限: {{ format_date(action.due_date, "%m月%d日") if action.due_date else "未定" }}
</div>
{% endfor %}
"#;

const MEETING_MINIMAL_JA: &str = r#"<div class="date-simple">{{ format_date(meeting_date, "%Y年%m月%d日") }}</div>
<h1>{{ meeting_title }}</h1>
<hr class="minimal-divider">
<h2>出席者</h2>
<p>{{ attendees | join("、") }}</p>
<h2>議題</h2>
{% for item in agenda_items %}
<p>{{ loop.index }}. {{ item }}</p>
{% endfor %}
<h2>討議内容</h2>
{{ discussion_points | markdown }}
<h2>アクション項目</h2>
{% for action in action_items %}
<div class="minimal-highlight">{{ action.task }} ({{ action.owner }})</div>
{% endfor %}
"#;

const LETTER_FORMAL_JA: &str = r#"<div class="date-line">{{ format_date(date, "%Y年%m月%d日") }}</div>
<div class="formal-box">
    {{ recipient_company }}<br>
    {{ recipient_title }} {{ recipient_name }} 様
</div>
<h1>{{ subject }}</h1>
<p>拝啓　時下ますますご清栄のこととお慶び申し上げます。</p>
{{ body | markdown }}
<p>何かご不明な点がございましたら、お気軽にお問い合わせください。</p>
<p>今後ともよろしくお願い申し上げます。</p>
<div class="signature-section">
    <p>敬具</p>
    <div>
        {{ sender_company }}<br>
        {{ sender_title }}<br>
        <strong>{{ sender_name }}</strong>
    </div>
</div>
"#;

const LETTER_MODERN_JA: &str = r#"<div class="badge">{{ format_date(date, "%Y年%m月%d日") }}</div>
<div class="card">
    <strong>宛先:</strong> {{ recipient_company }} {{ recipient_name }} 様
</div>
<h1>{{ subject }}</h1>
<div class="card">
    {{ body | markdown }}
</div>
<div class="card signature">
    <strong>{{ sender_company }}</strong><br>
    {{ sender_name }}
</div>
"#;

const REPORT_PROFESSIONAL_JA: &str = r#"<div class="date-header">{{ format_date(date, "%Y年%m月%d日") }}</div>
<h1>{{ report_title }}</h1>
<div class="card">
    <h2>📊 概要</h2>
    <p><strong>作成者：</strong>{{ author }}</p>
    {{ summary | markdown }}
</div>
<h2>📋 詳細内容</h2>
{% for section in content_sections %}
<div class="card">
    <h3>{{ section.title }}</h3>
    {{ section.content | markdown }}
</div>
{% endfor %}
<h2>💡 結論・提案</h2>
<div class="card">
    {{ conclusions | markdown }}
    {% if recommendations %}
    <h3>推奨事項</h3>
    {{ recommendations | bullets }}
    {% endif %}
</div>
"#;

const REPORT_CREATIVE_JA: &str = r#"<div class="content">
    <div class="badge">{{ format_date(date, "%Y年%m月%d日") }}</div>
    <h1>{{ report_title }}</h1>
    <div class="creative-card">
        <h2>📊 概要</h2>
        <p><strong>作成者：</strong>{{ author }}</p>
        {{ summary | markdown }}
    </div>
    {% for section in content_sections %}
    <div class="creative-card">
        <h2>📋 {{ section.title }}</h2>
        {{ section.content | markdown }}
    </div>
    {% endfor %}
    <div class="creative-card">
        <h2>💡 重要なインサイト</h2>
        {% for insight in key_insights %}
        <div class="highlight">{{ insight }}</div>
        {% endfor %}
    </div>
</div>
"#;

const FLYER_EVENT_JA: &str = r#"<h1 class="headline">{{ headline }}</h1>
<div class="card event">
    <h2>{{ event_name }}</h2>
    <div class="event-grid">
        <div>
            <h3>📅 日時</h3>
            <p><strong>{{ format_date(event_date, "%Y年%m月%d日") }}</strong></p>
            <p>{{ event_time }}</p>
        </div>
        <div>
            <h3>📍 場所</h3>
            <p>{{ location }}</p>
        </div>
    </div>
</div>
<div class="card">
    {{ description | markdown }}
</div>
<div class="card cta">
    <h3>{{ call_to_action }}</h3>
    <p><strong>お問い合わせ：</strong>{{ contact_info }}</p>
</div>
"#;

const FLYER_BUSINESS_JA: &str = r#"<h1>{{ company_name }}</h1>
<div class="card">
    <h2>{{ service_title }}</h2>
    {{ service_description | markdown }}
</div>
<h2>✨ サービスの特徴</h2>
{% for benefit in benefits %}
<div class="card">
    <span class="highlight">{{ benefit }}</span>
</div>
{% endfor %}
<div class="card cta">
    <h3>{{ call_to_action }}</h3>
    <p><strong>お問い合わせ：</strong>{{ contact_info }}</p>
</div>
<div class="footer">
    {{ company_name }} - プロフェッショナルなサービスをお届けします
</div>
"#;

const CSS_PROFESSIONAL: &str = concat!(
    "<style>\nbody { font-family: ",
    r#""Hiragino Kaku Gothic ProN", "Hiragino Sans", "Yu Gothic Medium", "Meiryo", sans-serif"#,
    "; font-size: 14px; line-height: 1.8; color: #1e293b; max-width: 800px; margin: 0 auto; padding: 40px 32px; }\n",
    "h1 { font-size: 24px; text-align: center; padding-bottom: 16px; border-bottom: 2px solid #22c55e; }\n",
    "h2 { font-size: 18px; padding: 8px 16px; border-left: 4px solid #22c55e; }\n",
    ".card { background: #f8f9fa; padding: 16px; margin: 16px 0; border-radius: 8px; border: 1px solid #e2e8f0; }\n",
    ".highlight { background: linear-gradient(transparent 60%, rgba(34, 197, 94, 0.3) 60%); }\n",
    ".footer { margin-top: 48px; text-align: center; font-size: 12px; color: #94a3b8; }\n",
    "</style>\n"
);

const CSS_MODERN: &str = concat!(
    "<style>\nbody { font-family: ",
    r#""Hiragino Kaku Gothic ProN", "Hiragino Sans", "Yu Gothic Medium", "Meiryo", sans-serif"#,
    "; font-size: 14px; line-height: 1.7; color: #1e293b; max-width: 750px; margin: 0 auto; padding: 48px 40px; }\n",
    "h1 { font-size: 28px; font-weight: 700; text-align: center; }\n",
    "h2 { font-size: 20px; padding: 12px 20px; border-radius: 8px; border-left: 4px solid #22c55e; }\n",
    ".card { background: white; padding: 24px; margin: 20px 0; border-radius: 12px; box-shadow: 0 4px 6px rgba(0,0,0,0.05); }\n",
    ".card.accent { border-left: 4px solid #3b82f6; }\n",
    ".badge { display: inline-block; background: #22c55e; color: white; padding: 8px 16px; border-radius: 20px; }\n",
    ".tag { display: inline-block; background: #f1f5f9; padding: 6px 12px; border-radius: 16px; margin: 4px; }\n",
    "</style>\n"
);

const CSS_FORMAL: &str = concat!(
    "<style>\nbody { font-family: \"MS Mincho\", \"Yu Mincho\", \"Hiragino Mincho ProN\", serif; ",
    "font-size: 14px; line-height: 1.9; color: #1a1a1a; max-width: 700px; margin: 0 auto; padding: 60px 48px; }\n",
    "h1 { font-size: 22px; text-align: center; padding: 20px 0; border: 2px solid #1a1a1a; }\n",
    ".formal-box { border: 1px solid #ccc; padding: 20px; margin: 30px 0; text-align: center; }\n",
    ".signature-section { margin-top: 60px; text-align: right; padding-right: 40px; }\n",
    "p { text-indent: 1em; }\n",
    "</style>\n"
);

const CSS_CREATIVE: &str = concat!(
    "<style>\nbody { font-family: ",
    r#""Hiragino Kaku Gothic ProN", "Hiragino Sans", "Yu Gothic Medium", "Meiryo", sans-serif"#,
    "; font-size: 14px; line-height: 1.6; color: #2d3748; max-width: 800px; margin: 0 auto; padding: 40px; ",
    "background: linear-gradient(135deg, #667eea 0%, #764ba2 100%); }\n",
    ".content { background: white; border-radius: 20px; padding: 40px; }\n",
    "h1 { font-size: 32px; font-weight: 800; text-align: center; }\n",
    ".creative-card { border-radius: 16px; padding: 24px; margin: 20px 0; border-left: 4px solid #667eea; }\n",
    "</style>\n"
);

const CSS_MINIMAL: &str = concat!(
    "<style>\nbody { font-family: ",
    r#""Hiragino Kaku Gothic ProN", "Hiragino Sans", "Yu Gothic Medium", "Meiryo", sans-serif"#,
    "; font-size: 15px; line-height: 1.7; color: #2d3748; max-width: 650px; margin: 0 auto; padding: 80px 40px; }\n",
    "h1 { font-size: 28px; font-weight: 300; margin-bottom: 60px; }\n",
    ".minimal-divider { width: 60px; height: 1px; background: #cbd5e0; border: none; }\n",
    ".minimal-highlight { border-left: 2px solid #e2e8f0; padding-left: 24px; font-style: italic; }\n",
    ".date-simple { font-size: 13px; color: #a0aec0; }\n",
    "</style>\n"
);

/// 文書種別ごとのテンプレート作成ガイド
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TemplateSuggestions {
    pub structure: Vec<&'static str>,
    pub variables: Vec<&'static str>,
    pub sample_template: &'static str,
}

pub fn template_suggestions(document_type: DocumentType) -> TemplateSuggestions {
    match document_type {
        DocumentType::MeetingMinutes => TemplateSuggestions {
            structure: vec![
                "Meeting title and date",
                "Attendees list",
                "Agenda items",
                "Discussion points",
                "Action items with owners",
                "Next meeting date",
            ],
            variables: MEETING_VARS.to_vec(),
            sample_template: r#"# {{ meeting_title }}
**Date:** {{ format_date(meeting_date) }}
**Attendees:** {{ attendees | join(", ") }}

## Agenda
{% for item in agenda_items %}
{{ loop.index }}. {{ item }}
{% endfor %}

## Action Items
{% for action in action_items %}
- {{ action.task }} (Owner: {{ action.owner }})
{% endfor %}
"#,
        },
        DocumentType::Letter => TemplateSuggestions {
            structure: vec![
                "Sender information",
                "Date",
                "Recipient information",
                "Salutation",
                "Body paragraphs",
                "Closing",
                "Signature",
            ],
            variables: vec![
                "sender_name",
                "sender_address",
                "recipient_name",
                "recipient_address",
                "date",
                "subject",
                "body",
                "closing",
                "signature",
            ],
            sample_template: r#"{{ sender_name }}
{{ sender_address }}

{{ format_date(date) }}

{{ recipient_name }}
{{ recipient_address }}

Dear {{ recipient_name }},

{{ body }}

{{ closing | default("Sincerely") }},
{{ signature }}
"#,
        },
        DocumentType::Flyer => TemplateSuggestions {
            structure: vec![
                "Eye-catching headline",
                "Event details",
                "Location and time",
                "Contact information",
                "Call to action",
            ],
            variables: vec![
                "headline",
                "event_name",
                "event_date",
                "event_time",
                "location",
                "description",
                "contact_info",
                "call_to_action",
            ],
            sample_template: r#"# {{ headline | upper }}

## {{ event_name }}

**When:** {{ format_date(event_date) }} at {{ event_time }}
**Where:** {{ location }}

{{ description }}

**{{ call_to_action }}**
Contact: {{ contact_info }}
"#,
        },
        _ => TemplateSuggestions {
            structure: vec!["Title", "Content", "Conclusion"],
            variables: vec!["title", "content"],
            sample_template: "# {{ title }}\n\n{{ content }}",
        },
    }
}
