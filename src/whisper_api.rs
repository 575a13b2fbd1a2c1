use crate::config::WhisperConfig;
use crate::error::CapabilityError;
use crate::transcribe_backend::{SpeechTranscriber, DEFAULT_CONFIDENCE};
use crate::types::{AudioSample, TranscriptionResult};
use crate::wav_writer;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart;
use serde::Deserialize;
use std::time::Duration;

/// OpenAI Whisper API レスポンス (verbose_json)
#[derive(Debug, Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    #[serde(default)]
    confidence: Option<f64>,
}

/// OpenAI Whisper API バックエンド
pub struct WhisperBackend {
    config: WhisperConfig,
    client: reqwest::Client,
}

impl WhisperBackend {
    pub fn new(config: WhisperConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .context("Whisper API HTTPクライアント作成失敗")?;

        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/audio/transcriptions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    /// Whisper APIを呼び出して文字起こし
    async fn request(
        &self,
        wav_data: Vec<u8>,
        language: Option<&str>,
        temperature: f32,
    ) -> Result<String, CapabilityError> {
        let part = multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")?;

        let mut form = multipart::Form::new()
            .part("file", part)
            .text("model", self.config.model.clone())
            .text("response_format", "verbose_json")
            .text("temperature", temperature.to_string());

        if let Some(language) = language.or(self.config.language.as_deref()) {
            form = form.text("language", language.to_string());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.map_request_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(CapabilityError::RequestFailed(format!(
                "Whisper API エラー: {} - {}",
                status, error_text
            )));
        }

        response.text().await.map_err(|e| self.map_request_error(e))
    }

    fn map_request_error(&self, err: reqwest::Error) -> CapabilityError {
        if err.is_timeout() {
            CapabilityError::Timeout(self.config.timeout_seconds)
        } else {
            err.into()
        }
    }
}

/// verbose_json レスポンスを文字起こし結果に変換
///
/// 信頼度は単語レベルの信頼度の平均。得られない場合は既定値を使う。
fn parse_response(
    body: &str,
    fallback_duration: f64,
    model: &str,
    temperature: f32,
) -> Result<TranscriptionResult, CapabilityError> {
    let response: WhisperResponse = serde_json::from_str(body)
        .map_err(|e| CapabilityError::InvalidResponse(format!("Whisper API レスポンスパース失敗: {}", e)))?;

    let confidences: Vec<f64> = response.words.iter().filter_map(|w| w.confidence).collect();
    let confidence = if confidences.is_empty() {
        DEFAULT_CONFIDENCE
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    Ok(TranscriptionResult {
        text: response.text.trim().to_string(),
        language: response
            .language
            .as_deref()
            .map(language_code)
            .unwrap_or_else(|| "en".to_string()),
        duration_seconds: response.duration.unwrap_or(fallback_duration),
        confidence: confidence.clamp(0.0, 1.0),
        model: Some(model.to_string()),
        temperature: Some(temperature),
    })
}

/// Whisper が返す言語名を言語コードに変換
fn language_code(language: &str) -> String {
    match language.to_ascii_lowercase().as_str() {
        "english" => "en".to_string(),
        "japanese" => "ja".to_string(),
        "chinese" => "zh".to_string(),
        "korean" => "ko".to_string(),
        "spanish" => "es".to_string(),
        "french" => "fr".to_string(),
        "german" => "de".to_string(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SpeechTranscriber for WhisperBackend {
    async fn transcribe(
        &self,
        audio: &AudioSample,
        language: Option<&str>,
        temperature: f32,
    ) -> Result<TranscriptionResult, CapabilityError> {
        if self.config.api_key.is_empty() {
            return Err(CapabilityError::NotConfigured("whisper.api_key"));
        }

        let wav_data = wav_writer::encode_wav(audio)
            .map_err(|e| CapabilityError::RequestFailed(format!("WAV変換失敗: {:#}", e)))?;
        log::debug!(
            "Whisper API: {} サンプル ({} バイト) を文字起こし中 (temperature {})",
            audio.len(),
            wav_data.len(),
            temperature
        );

        let body = self.request(wav_data, language, temperature).await?;
        let result = parse_response(
            &body,
            audio.duration_seconds(),
            &self.config.model,
            temperature,
        )?;

        log::info!(
            "Whisper API: 文字起こし完了 ({}文字, 言語 {}, 信頼度 {:.2})",
            result.text.chars().count(),
            result.language,
            result.confidence
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "whisper"
    }
}
