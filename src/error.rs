//! エラー型の定義
//!
//! 回復可能なエラー（ステージ内でフォールバックされるもの）と、
//! 呼び出し元へ伝播する致命的なエラーを型で区別する。

use thiserror::Error;

/// 音声デコード・前処理のエラー
///
/// 読み込みに失敗した音声を無音として扱うことはしない。
/// このエラーは常に呼び出し元へ伝播する。
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("音声デコードに失敗: {0}")]
    Decode(String),
    #[error("音声データが空です")]
    Empty,
    #[error("音声ファイルが大きすぎます: {size} バイト (上限 {limit} バイト)")]
    TooLarge { size: usize, limit: usize },
    #[error("リサンプリングに失敗: {0}")]
    Resample(String),
}

/// 音声強調の失敗
///
/// 内部でのリトライは行わない。強調なしの音声で続行するかどうかは
/// 呼び出し元が判断する。
#[derive(Debug, Error)]
pub enum EnhancementError {
    #[error("強調対象の音声が不正: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// VAD パラメータのエラー
#[derive(Debug, Error)]
pub enum VadError {
    #[error("aggressiveness は 0-3 の範囲で指定してください: {0}")]
    InvalidAggressiveness(u8),
    #[error(transparent)]
    Audio(#[from] AudioError),
}

/// 外部ケイパビリティ（文字起こし・テキスト生成）の呼び出し失敗
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("API リクエスト失敗: {0}")]
    RequestFailed(String),
    #[error("API 応答タイムアウト ({0}秒)")]
    Timeout(u64),
    #[error("API 応答が不正: {0}")]
    InvalidResponse(String),
    #[error("API が設定されていません: {0}")]
    NotConfigured(&'static str),
}

impl From<reqwest::Error> for CapabilityError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CapabilityError::InvalidResponse(err.to_string())
        } else {
            CapabilityError::RequestFailed(err.to_string())
        }
    }
}

/// テンプレートのパース・レンダリングエラー
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TemplateError {
    #[error("テンプレート構文エラー ({line}行目): {message}")]
    Syntax { line: usize, message: String },
    #[error("テンプレートが見つかりません: {0}")]
    NotFound(String),
    #[error("テンプレートのレンダリングに失敗: {0}")]
    Render(String),
}

impl TemplateError {
    pub(crate) fn syntax(line: usize, message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            line,
            message: message.into(),
        }
    }
}

/// ドキュメント生成の致命的エラー
///
/// 外部ケイパビリティの失敗はここには含まれない（各ステージでフォールバックする）。
/// 入力そのものが不正な場合のみ呼び出し元へ返る。
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("文字起こしテキストが空です")]
    EmptyTranscript,
    #[error("未対応のドキュメント種別: {0}")]
    InvalidDocumentType(String),
}
