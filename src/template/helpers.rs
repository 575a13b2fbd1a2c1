//! テンプレートから呼べる関数とフィルタ
//!
//! 登録できるのはここに列挙したものだけ。未知の名前はパース時にエラーになる。

use crate::error::TemplateError;
use crate::text;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex_lite::Regex;
use serde_json::Value;
use std::fmt::Write as _;

use super::render::{display, RenderScope};

const DEFAULT_DATE_PATTERN: &str = "%B %d, %Y";

/// タイトルケースで小文字のまま残す語
const MINOR_WORDS: [&str; 13] = [
    "a", "an", "the", "and", "but", "or", "for", "nor", "on", "at", "to", "from", "by",
];

/// `name(args)` 形式で呼べる関数
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Function {
    FormatDate,
    CurrentDate,
    FormatCurrency,
    CreateList,
    FormatPhone,
    WordCount,
    TruncateWords,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "format_date" => Function::FormatDate,
            "current_date" => Function::CurrentDate,
            "format_currency" => Function::FormatCurrency,
            "create_list" => Function::CreateList,
            "format_phone" => Function::FormatPhone,
            "word_count" => Function::WordCount,
            "truncate_words" => Function::TruncateWords,
            _ => return None,
        })
    }

    pub fn call(self, args: &[Value], scope: &RenderScope) -> Result<Value, TemplateError> {
        match self {
            Function::FormatDate => {
                let pattern = str_arg(args, 1).unwrap_or(DEFAULT_DATE_PATTERN);
                format_date(arg(args, 0), pattern).map(Value::String)
            }
            Function::CurrentDate => {
                let pattern = str_arg(args, 0).unwrap_or(DEFAULT_DATE_PATTERN);
                format_naive(&scope.now, pattern).map(Value::String)
            }
            Function::FormatCurrency => Ok(Value::String(format_currency(
                arg(args, 0),
                str_arg(args, 1).unwrap_or("USD"),
            ))),
            Function::CreateList => Ok(create_list(arg(args, 0), str_arg(args, 1).unwrap_or(","))),
            Function::FormatPhone => Ok(Value::String(format_phone(arg(args, 0)))),
            Function::WordCount => Ok(Value::from(text::word_count(&display(arg(args, 0))))),
            Function::TruncateWords => {
                let limit = usize_arg(args, 1)?.unwrap_or(50);
                let suffix = str_arg(args, 2).unwrap_or("...");
                Ok(Value::String(truncate_words(&display(arg(args, 0)), limit, suffix)))
            }
        }
    }
}

/// `value | name(args)` 形式のフィルタ
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Filter {
    TitleCase,
    Currency,
    Phone,
    Markdown,
    Bullets,
    Numbered,
    Join,
    Length,
    Upper,
    Lower,
    Default,
    WordCount,
    TruncateWords,
}

impl Filter {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "title_case" => Filter::TitleCase,
            "currency" => Filter::Currency,
            "phone" => Filter::Phone,
            "markdown" => Filter::Markdown,
            "bullets" => Filter::Bullets,
            "numbered" => Filter::Numbered,
            "join" => Filter::Join,
            "length" => Filter::Length,
            "upper" => Filter::Upper,
            "lower" => Filter::Lower,
            "default" => Filter::Default,
            "word_count" => Filter::WordCount,
            "truncate_words" => Filter::TruncateWords,
            _ => return None,
        })
    }

    /// `input` は左辺の値、`args` は括弧内の引数
    pub fn apply(self, input: &Value, args: &[Value]) -> Result<Value, TemplateError> {
        let out = match self {
            Filter::TitleCase => Value::String(title_case(&display(input))),
            Filter::Currency => {
                Value::String(format_currency(input, str_arg(args, 0).unwrap_or("USD")))
            }
            Filter::Phone => Value::String(format_phone(input)),
            Filter::Markdown => Value::String(markdown_to_html(&display(input))),
            Filter::Bullets => Value::String(html_list("ul", input)),
            Filter::Numbered => Value::String(html_list("ol", input)),
            Filter::Join => {
                let sep = str_arg(args, 0).unwrap_or("");
                match input {
                    Value::Array(items) => Value::String(
                        items.iter().map(display).collect::<Vec<_>>().join(sep),
                    ),
                    other => Value::String(display(other)),
                }
            }
            Filter::Length => Value::from(match input {
                Value::Array(items) => items.len(),
                Value::Object(map) => map.len(),
                Value::String(s) => s.chars().count(),
                Value::Null => 0,
                other => display(other).chars().count(),
            }),
            Filter::Upper => Value::String(display(input).to_uppercase()),
            Filter::Lower => Value::String(display(input).to_lowercase()),
            Filter::Default => match input {
                Value::Null => arg(args, 0).clone(),
                Value::String(s) if s.is_empty() => arg(args, 0).clone(),
                other => other.clone(),
            },
            Filter::WordCount => Value::from(text::word_count(&display(input))),
            Filter::TruncateWords => {
                let limit = usize_arg(args, 0)?.unwrap_or(50);
                let suffix = str_arg(args, 1).unwrap_or("...");
                Value::String(truncate_words(&display(input), limit, suffix))
            }
        };
        Ok(out)
    }
}

static NULL: Value = Value::Null;

fn arg(args: &[Value], idx: usize) -> &Value {
    args.get(idx).unwrap_or(&NULL)
}

fn str_arg(args: &[Value], idx: usize) -> Option<&str> {
    args.get(idx).and_then(Value::as_str)
}

fn usize_arg(args: &[Value], idx: usize) -> Result<Option<usize>, TemplateError> {
    match args.get(idx) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => as_number(v)
            .filter(|n| *n >= 0.0)
            .map(|n| Some(n as usize))
            .ok_or_else(|| TemplateError::Render(format!("語数には非負の数値が必要です: {}", v))),
    }
}

/// 数値または数値として読める文字列
pub(crate) fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn format_naive(dt: &NaiveDateTime, pattern: &str) -> Result<String, TemplateError> {
    let mut out = String::new();
    write!(out, "{}", dt.format(pattern))
        .map_err(|_| TemplateError::Render(format!("不正な日付書式: {}", pattern)))?;
    Ok(out)
}

/// ISO-8601 文字列を日時として解釈する
fn parse_iso(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    let normalized = s.replace('Z', "+00:00");
    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Some(dt.naive_local());
    }
    for pattern in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, pattern) {
            return Some(dt);
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

/// 日付を書式化する。解釈できない入力はそのまま返す
pub fn format_date(value: &Value, pattern: &str) -> Result<String, TemplateError> {
    match value {
        Value::Null => Ok(String::new()),
        Value::String(s) => match parse_iso(s) {
            Some(dt) => format_naive(&dt, pattern),
            None => Ok(s.clone()),
        },
        other => Ok(display(other)),
    }
}

/// 3桁区切りの数値文字列
fn group_thousands(amount: f64, decimals: usize) -> String {
    let formatted = format!("{:.*}", decimals, amount.abs());
    let (int_part, frac_part) = match formatted.split_once('.') {
        Some((i, f)) => (i.to_string(), Some(f.to_string())),
        None => (formatted, None),
    };

    let digits: Vec<char> = int_part.chars().collect();
    let mut grouped = String::new();
    for (i, c) in digits.iter().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(*c);
    }

    let sign = if amount < 0.0 { "-" } else { "" };
    match frac_part {
        Some(frac) => format!("{}{}.{}", sign, grouped, frac),
        None => format!("{}{}", sign, grouped),
    }
}

/// 通貨書式。数値でない入力はそのまま文字列化する
pub fn format_currency(amount: &Value, currency: &str) -> String {
    let Some(n) = as_number(amount) else {
        return display(amount);
    };
    match currency {
        "USD" => format!("${}", group_thousands(n, 2)),
        "EUR" => format!("€{}", group_thousands(n, 2)),
        "GBP" => format!("£{}", group_thousands(n, 2)),
        "JPY" => format!("¥{}", group_thousands(n, 0)),
        other => format!("{} {}", group_thousands(n, 2), other),
    }
}

/// 区切り文字で分割し、空要素を除いたリストにする
pub fn create_list(items: &Value, separator: &str) -> Value {
    match items {
        Value::Array(_) => items.clone(),
        Value::Null => Value::Array(Vec::new()),
        other => {
            let s = display(other);
            let pieces: Vec<&str> = if separator.is_empty() {
                vec![s.as_str()]
            } else {
                s.split(separator).collect()
            };
            Value::Array(
                pieces
                    .into_iter()
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(|p| Value::String(p.to_string()))
                    .collect(),
            )
        }
    }
}

/// 電話番号の整形
///
/// 10桁は北米形式、1で始まる11桁は国番号付き、0で始まる11桁は
/// 国内の携帯番号形式にする。それ以外は入力のまま。
pub fn format_phone(phone: &Value) -> String {
    let original = display(phone);
    let digits: String = original.chars().filter(|c| c.is_ascii_digit()).collect();
    match digits.len() {
        10 => format!("({}) {}-{}", &digits[..3], &digits[3..6], &digits[6..]),
        11 if digits.starts_with('1') => format!(
            "+1 ({}) {}-{}",
            &digits[1..4],
            &digits[4..7],
            &digits[7..]
        ),
        11 if digits.starts_with('0') => {
            format!("{}-{}-{}", &digits[..3], &digits[3..7], &digits[7..])
        }
        _ => original,
    }
}

/// 空白区切りで語数を制限し、超えた場合は接尾辞を付ける
pub fn truncate_words(text: &str, limit: usize, suffix: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= limit {
        return text.to_string();
    }
    format!("{}{}", words[..limit].join(" "), suffix)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn title_case(text: &str) -> String {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower.split_whitespace().collect();
    if words.is_empty() {
        return text.to_string();
    }
    words
        .iter()
        .enumerate()
        .map(|(i, w)| {
            if i > 0 && MINOR_WORDS.contains(w) {
                w.to_string()
            } else {
                capitalize(w)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn replace_pattern(pattern: &str, input: &str, replacement: &str) -> String {
    match Regex::new(pattern) {
        Ok(re) => re.replace_all(input, replacement).into_owned(),
        Err(e) => {
            log::error!("正規表現のコンパイルに失敗: {} ({})", pattern, e);
            input.to_string()
        }
    }
}

/// 太字・斜体・段落区切りだけを扱う簡易 Markdown 変換
pub fn markdown_to_html(text: &str) -> String {
    let html = replace_pattern(r"\*\*(.*?)\*\*", text, "<strong>$1</strong>");
    let html = replace_pattern(r"\*(.*?)\*", &html, "<em>$1</em>");
    let html = html.replace("\n\n", "</p><p>");
    format!("<p>{}</p>", html).replace("<p></p>", "")
}

fn html_list(tag: &str, input: &Value) -> String {
    let items: Vec<String> = match input {
        Value::Array(items) => items.iter().map(display).collect(),
        Value::Null => Vec::new(),
        other => display(other)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect(),
    };
    if items.is_empty() {
        return String::new();
    }
    let body: String = items.iter().map(|i| format!("<li>{}</li>", i)).collect();
    format!("<{tag}>{body}</{tag}>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_date() {
        assert_eq!(
            format_date(&json!("2024-03-15"), "%B %d, %Y").unwrap(),
            "March 15, 2024"
        );
        assert_eq!(
            format_date(&json!("2024-03-15T09:30:00Z"), "%Y年%m月%d日").unwrap(),
            "2024年03月15日"
        );
        assert_eq!(format_date(&json!("next friday"), "%Y").unwrap(), "next friday");
        assert_eq!(format_date(&Value::Null, "%Y").unwrap(), "");
    }

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(&json!(1234.5), "USD"), "$1,234.50");
        assert_eq!(format_currency(&json!(1234567), "EUR"), "€1,234,567.00");
        assert_eq!(format_currency(&json!("980"), "JPY"), "¥980");
        assert_eq!(format_currency(&json!(12.3), "CHF"), "12.30 CHF");
        assert_eq!(format_currency(&json!(-5), "USD"), "$-5.00");
        assert_eq!(format_currency(&json!("n/a"), "USD"), "n/a");
    }

    #[test]
    fn test_format_phone() {
        assert_eq!(format_phone(&json!("555.123.4567")), "(555) 123-4567");
        assert_eq!(format_phone(&json!("1-555-123-4567")), "+1 (555) 123-4567");
        assert_eq!(format_phone(&json!("09012345678")), "090-1234-5678");
        assert_eq!(format_phone(&json!("12345")), "12345");
    }

    #[test]
    fn test_create_list() {
        assert_eq!(create_list(&json!(" a, b ,,c "), ","), json!(["a", "b", "c"]));
        assert_eq!(create_list(&json!("x;y"), ";"), json!(["x", "y"]));
        assert_eq!(create_list(&Value::Null, ","), json!([]));
    }

    #[test]
    fn test_truncate_words() {
        assert_eq!(truncate_words("one two three", 3, "..."), "one two three");
        assert_eq!(truncate_words("one two three four", 2, "…"), "one two…");
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("the lord OF the rings"), "The Lord Of the Rings");
        assert_eq!(title_case("a tale of two cities"), "A Tale Of Two Cities");
        assert_eq!(title_case("   "), "   ");
    }

    #[test]
    fn test_markdown_to_html() {
        assert_eq!(
            markdown_to_html("**Bold** and *it*\n\nNext"),
            "<p><strong>Bold</strong> and <em>it</em></p><p>Next</p>"
        );
        assert_eq!(markdown_to_html(""), "");
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            Filter::Bullets.apply(&json!(["a", "b"]), &[]).unwrap(),
            json!("<ul><li>a</li><li>b</li></ul>")
        );
        assert_eq!(
            Filter::Numbered.apply(&json!("x\n\ny"), &[]).unwrap(),
            json!("<ol><li>x</li><li>y</li></ol>")
        );
        assert_eq!(Filter::Bullets.apply(&json!([]), &[]).unwrap(), json!(""));
    }

    #[test]
    fn test_default_and_length() {
        assert_eq!(
            Filter::Default.apply(&Value::Null, &[json!("未定")]).unwrap(),
            json!("未定")
        );
        assert_eq!(Filter::Default.apply(&json!("x"), &[json!("y")]).unwrap(), json!("x"));
        assert_eq!(Filter::Length.apply(&json!([1, 2, 3]), &[]).unwrap(), json!(3));
        assert_eq!(Filter::Length.apply(&json!("日本語"), &[]).unwrap(), json!(3));
    }

    #[test]
    fn test_unknown_names() {
        assert!(Function::from_name("eval").is_none());
        assert!(Filter::from_name("safe").is_none());
        assert_eq!(Filter::from_name("markdown"), Some(Filter::Markdown));
    }
}
