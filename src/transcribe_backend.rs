use crate::error::CapabilityError;
use crate::types::{AudioSample, TranscriptionResult};
use async_trait::async_trait;

/// 単語レベルの信頼度が得られない場合の既定の信頼度
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// 文字起こしバックエンドの共通トレイト
///
/// 1回の呼び出しで音声全体を文字起こしする。失敗時のリトライは行わない。
#[async_trait]
pub trait SpeechTranscriber: Send + Sync {
    /// 音声を文字起こし
    ///
    /// # Arguments
    /// * `audio` - 文字起こし対象の音声
    /// * `language` - 言語コードのヒント（None の場合は自動判定）
    /// * `temperature` - デコード時の temperature
    async fn transcribe(
        &self,
        audio: &AudioSample,
        language: Option<&str>,
        temperature: f32,
    ) -> Result<TranscriptionResult, CapabilityError>;

    /// バックエンド名（ログ用）
    fn name(&self) -> &str;
}

/// 強調後の品質スコアから文字起こしの temperature を選ぶ
///
/// 品質が高いほど決定的なデコードにする。
pub fn temperature_for_quality(quality_score: f64) -> f32 {
    if quality_score > 0.8 {
        0.0
    } else if quality_score > 0.5 {
        0.2
    } else {
        0.4
    }
}
