//! 制限付きテンプレートエンジン
//!
//! 変数展開・繰り返し・条件分岐と、列挙済みの関数・フィルタだけを扱う。
//! 未知の関数やフィルタはパース時のエラーになる。描画時に見つからない
//! 変数は空文字列として扱い、部分的な文書でも描画を止めない。

mod helpers;
mod parser;
mod render;

use crate::error::TemplateError;
use crate::template_store::Template;
use chrono::{Datelike, Local, NaiveDateTime};
use parser::Node;
use render::RenderScope;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// 描画時に必ず注入される変数
pub const COMMON_VARIABLES: [&str; 3] = ["current_date", "current_time", "current_year"];

/// パース済みテンプレート
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledTemplate {
    nodes: Vec<Node>,
}

impl CompiledTemplate {
    /// テンプレート内で束縛されずに参照される変数名（共通変数を除く）
    pub fn referenced_variables(&self) -> BTreeSet<String> {
        parser::free_variables(&self.nodes)
            .into_iter()
            .filter(|name| !COMMON_VARIABLES.contains(&name.as_str()))
            .collect()
    }

    /// 指定時刻を「現在」として描画する
    pub fn render_at(
        &self,
        variables: &Map<String, Value>,
        now: NaiveDateTime,
    ) -> Result<String, TemplateError> {
        let mut merged = common_variables(&now);
        for (key, value) in variables {
            merged.insert(key.clone(), value.clone());
        }

        let mut scope = RenderScope::new(merged, now);
        let mut out = String::new();
        render::render_nodes(&self.nodes, &mut scope, &mut out)?;
        Ok(out)
    }
}

fn common_variables(now: &NaiveDateTime) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert(
        "current_date".to_string(),
        Value::String(now.format("%B %d, %Y").to_string()),
    );
    vars.insert(
        "current_time".to_string(),
        Value::String(now.format("%I:%M %p").to_string()),
    );
    vars.insert("current_year".to_string(), Value::from(now.year()));
    vars
}

/// テンプレート検証の結果
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub undefined_variables: Vec<String>,
    pub syntax_errors: Vec<String>,
}

impl ValidationReport {
    fn from_error(err: TemplateError) -> Self {
        Self {
            valid: false,
            undefined_variables: Vec::new(),
            syntax_errors: vec![err.to_string()],
        }
    }
}

/// テンプレートエンジン
///
/// 状態を持たないので、共有しても複製してもよい。
#[derive(Clone, Copy, Debug, Default)]
pub struct TemplateEngine;

impl TemplateEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn compile(&self, markup: &str) -> Result<CompiledTemplate, TemplateError> {
        Ok(CompiledTemplate {
            nodes: parser::parse(markup)?,
        })
    }

    /// 現在時刻で描画する
    pub fn render(&self, markup: &str, variables: &Map<String, Value>) -> Result<String, TemplateError> {
        self.render_at(markup, variables, Local::now().naive_local())
    }

    pub fn render_at(
        &self,
        markup: &str,
        variables: &Map<String, Value>,
        now: NaiveDateTime,
    ) -> Result<String, TemplateError> {
        self.compile(markup)?.render_at(variables, now)
    }

    /// 変数の値なしで構文を検証し、参照される変数を列挙する
    pub fn validate(&self, markup: &str) -> ValidationReport {
        match self.compile(markup) {
            Ok(compiled) => ValidationReport {
                valid: true,
                undefined_variables: compiled.referenced_variables().into_iter().collect(),
                syntax_errors: Vec::new(),
            },
            Err(err) => ValidationReport::from_error(err),
        }
    }

    /// テンプレートの宣言変数に含まれない参照を報告する
    pub fn validate_against(&self, template: &Template) -> ValidationReport {
        match self.compile(&template.markup) {
            Ok(compiled) => ValidationReport {
                valid: true,
                undefined_variables: compiled
                    .referenced_variables()
                    .into_iter()
                    .filter(|name| !template.variables.iter().any(|v| v == name))
                    .collect(),
                syntax_errors: Vec::new(),
            },
            Err(err) => ValidationReport::from_error(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocumentType;
    use chrono::NaiveDate;
    use serde_json::json;

    fn fixed_now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap()
    }

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("object expected"),
        }
    }

    fn render(markup: &str, value: Value) -> String {
        TemplateEngine::new()
            .render_at(markup, &vars(value), fixed_now())
            .unwrap()
    }

    #[test]
    fn test_missing_variable_renders_empty() {
        assert_eq!(render("Hello {{missing_var}}!", json!({})), "Hello !");
        assert_eq!(render("{{ missing.attr[0] }}|", json!({})), "|");
    }

    #[test]
    fn test_rendering_is_repeatable() {
        let engine = TemplateEngine::new();
        let markup = "{{ title | upper }} {{ current_date }} {% for s in sections %}{{ s.heading }}{% endfor %}";
        let v = vars(json!({"title": "t", "sections": [{"heading": "A"}, {"heading": "B"}]}));
        let first = engine.render_at(markup, &v, fixed_now()).unwrap();
        let second = engine.render_at(markup, &v, fixed_now()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, "T March 15, 2024 AB");
    }

    #[test]
    fn test_common_variables_and_override() {
        assert_eq!(
            render("{{ current_time }} {{ current_year }}", json!({})),
            "02:05 PM 2024"
        );
        assert_eq!(render("{{ current_date }}", json!({"current_date": "today"})), "today");
    }

    #[test]
    fn test_loop_variables() {
        let markup = "{% for a in names %}{{ a }}{% if not loop.last %}, {% endif %}{% endfor %}";
        assert_eq!(render(markup, json!({"names": ["Ann", "Bob", "Cy"]})), "Ann, Bob, Cy");
        assert_eq!(
            render(
                "{% for x in xs %}{{ loop.index }}/{{ loop.length }} {% endfor %}",
                json!({"xs": ["a", "b"]})
            ),
            "1/2 2/2 "
        );
        assert_eq!(
            render("{% for x in xs %}{{ x }}{% else %}none{% endfor %}", json!({})),
            "none"
        );
    }

    #[test]
    fn test_if_elif_else() {
        let markup = "{% if n > 10 %}big{% elif n > 5 %}mid{% else %}small{% endif %}";
        assert_eq!(render(markup, json!({"n": 12})), "big");
        assert_eq!(render(markup, json!({"n": 7})), "mid");
        assert_eq!(render(markup, json!({"n": 1})), "small");
    }

    #[test]
    fn test_set_and_inline_conditional() {
        let markup = r#"{% set label = "期限: " %}{{ label }}{{ format_date(due, "%m月%d日") if due else "未定" }}"#;
        assert_eq!(render(markup, json!({"due": "2024-04-01"})), "期限: 04月01日");
        assert_eq!(render(markup, json!({})), "期限: 未定");
    }

    #[test]
    fn test_functions_and_filters() {
        assert_eq!(
            render("{{ format_currency(1234.5) }} {{ price | currency('EUR') }}", json!({"price": 10})),
            "$1,234.50 €10.00"
        );
        assert_eq!(render("{{ tel | phone }}", json!({"tel": "5551234567"})), "(555) 123-4567");
        assert_eq!(
            render("{{ create_list('a, b') | bullets }}", json!({})),
            "<ul><li>a</li><li>b</li></ul>"
        );
        assert_eq!(render("{{ truncate_words(t, 2) }}", json!({"t": "a b c"})), "a b...");
        assert_eq!(render("{{ word_count(t) }}", json!({"t": "a b c"})), "3");
        assert_eq!(render("{{ current_date('%Y') }}", json!({})), "2024");
        assert_eq!(render("{{ name | title_case }}", json!({"name": "the end of it"})), "The End Of It");
        assert_eq!(render("{{ xs | join('-') }}", json!({"xs": [1, 2]})), "1-2");
    }

    #[test]
    fn test_unknown_filter_is_syntax_error() {
        let err = TemplateEngine::new()
            .render_at("{{ x | shout }}", &Map::new(), fixed_now())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Syntax { .. }));
    }

    #[test]
    fn test_bad_date_pattern_is_render_error() {
        let err = TemplateEngine::new()
            .render_at("{{ current_date('%Q') }}", &Map::new(), fixed_now())
            .unwrap_err();
        assert!(matches!(err, TemplateError::Render(_)));
    }

    #[test]
    fn test_validate() {
        let engine = TemplateEngine::new();
        let report = engine.validate("# {{ title }}\n{% for s in sections %}{{ s.content }}{% endfor %}{{ current_year }}");
        assert!(report.valid);
        assert_eq!(report.undefined_variables, vec!["sections", "title"]);
        assert!(report.syntax_errors.is_empty());

        let broken = engine.validate("{% if x %}");
        assert!(!broken.valid);
        assert_eq!(broken.syntax_errors.len(), 1);
        assert!(broken.undefined_variables.is_empty());
    }

    #[test]
    fn test_validate_against_declared_variables() {
        let template = Template::new(
            "custom_test",
            DocumentType::Custom,
            "{{ title }} {{ author }}",
            &["title"],
        );
        let report = TemplateEngine::new().validate_against(&template);
        assert!(report.valid);
        assert_eq!(report.undefined_variables, vec!["author"]);
    }
}
