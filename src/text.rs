//! 単語数カウントとトークン化
//!
//! 空白区切りを基本とし、漢字・かな は1文字を1語として数える。
//! 日本語の文字起こしでも意味のある語数になる。

/// 漢字・ひらがな・カタカナかどうか
fn is_cjk_word_char(c: char) -> bool {
    matches!(c as u32,
        0x3040..=0x309F      // ひらがな
        | 0x30A0..=0x30FF    // カタカナ
        | 0x3400..=0x4DBF    // CJK 統合漢字拡張A
        | 0x4E00..=0x9FFF    // CJK 統合漢字
        | 0xF900..=0xFAFF    // CJK 互換漢字
        | 0xFF66..=0xFF9F    // 半角カタカナ
    )
}

/// 句読点など、語の区切りとして扱う全角記号
fn is_cjk_separator(c: char) -> bool {
    matches!(c as u32, 0x3000..=0x303F | 0xFF01..=0xFF0F | 0xFF1A..=0xFF20)
}

/// テキストを語に分割する
///
/// 空白で区切ったうえで、漢字・かなを1文字ずつ切り出す。
pub fn tokens(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for chunk in text.split_whitespace() {
        let mut run_start: Option<usize> = None;
        for (i, c) in chunk.char_indices() {
            if is_cjk_word_char(c) || is_cjk_separator(c) {
                if let Some(start) = run_start.take() {
                    out.push(&chunk[start..i]);
                }
                if is_cjk_word_char(c) {
                    out.push(&chunk[i..i + c.len_utf8()]);
                }
            } else if run_start.is_none() {
                run_start = Some(i);
            }
        }
        if let Some(start) = run_start {
            out.push(&chunk[start..]);
        }
    }
    out
}

/// 語数
pub fn word_count(text: &str) -> usize {
    tokens(text).len()
}

/// 先頭から `max_chars` 文字で切り詰める（文字境界を守る）
///
/// 切り詰めた場合は true を返す。
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => (&text[..idx], true),
        None => (text, false),
    }
}
