//! 音声処理パイプライン
//!
//! デコードした音声を共有し、特徴量抽出・VAD・音声強調を並行に実行する。
//! 各タスクの失敗やタイムアウトはそのタスク専用のフォールバックで吸収し、
//! 文字起こしと品質評価まで必ず到達する。デコード失敗だけが呼び出し元へ返る。

use crate::audio_decoder;
use crate::config::Config;
use crate::enhancer::{AudioEnhancer, EnhancementResult};
use crate::error::AudioError;
use crate::quality::{self, QualityAssessment, QualityAssessor, QualityInputs, QualityIssue, Recommendations};
use crate::signal::{self, AudioFeatures};
use crate::transcribe_backend::{temperature_for_quality, SpeechTranscriber};
use crate::types::{AudioSample, EnhancementLevel, QualityMetrics, SpeechSegment, TranscriptionResult, VadStatistics};
use crate::vad::{self, VoiceActivityDetector};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// 強調しない場合に文字起こしの temperature 選択へ使う品質スコア
const UNENHANCED_QUALITY_SCORE: f64 = 0.5;

/// 1回の処理のオプション
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessingOptions {
    pub enable_enhancement: bool,
    pub level: EnhancementLevel,
    /// 文字起こしの言語ヒント
    pub language: Option<String>,
    pub vad_aggressiveness: u8,
}

impl ProcessingOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enable_enhancement: config.enhancement.enabled,
            level: config.enhancement.level,
            language: config.whisper.as_ref().and_then(|w| w.language.clone()),
            vad_aggressiveness: config.vad.aggressiveness,
        }
    }

    /// 強調レベルを変更する。VAD の厳しさもレベルに合わせる
    pub fn with_level(mut self, level: EnhancementLevel) -> Self {
        self.level = level;
        self.vad_aggressiveness = level.vad_aggressiveness();
        self
    }
}

/// 処理の詳細
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessingDetails {
    /// 元音声の基本指標
    pub original_metrics: QualityMetrics,
    /// 特徴量抽出に失敗した場合は None
    pub features: Option<AudioFeatures>,
    pub vad: VadStatistics,
    pub segments: Vec<SpeechSegment>,
    pub enhancement_applied: bool,
    pub enhancement_level: EnhancementLevel,
    pub enhanced_metrics: Option<QualityMetrics>,
    pub snr_improvement: Option<f64>,
    pub enhancement_quality_score: Option<f64>,
    pub transcription_temperature: f32,
    pub processing_time_seconds: f64,
}

/// 音声処理の結果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProcessingReport {
    /// 文字起こしに失敗した場合は None
    pub transcription: Option<TranscriptionResult>,
    pub quality_assessment: QualityAssessment,
    pub details: ProcessingDetails,
    pub recommendations: Recommendations,
    /// 強調後の音声（強調に成功した場合のみ）
    #[serde(skip)]
    pub enhanced_audio: Option<AudioSample>,
}

/// 音声処理の統括
pub struct AudioProcessor {
    config: Config,
    transcriber: Option<Arc<dyn SpeechTranscriber>>,
}

impl AudioProcessor {
    pub fn new(config: &Config, transcriber: Option<Arc<dyn SpeechTranscriber>>) -> Self {
        Self {
            config: config.clone(),
            transcriber,
        }
    }

    /// 音声を処理する
    ///
    /// # Errors
    ///
    /// 音声をデコードできない場合のみ `AudioError`。それ以外の失敗は
    /// レポートの issues に記録される。
    pub async fn process(
        &self,
        audio_bytes: &[u8],
        options: &ProcessingOptions,
    ) -> Result<ProcessingReport, AudioError> {
        let started = Instant::now();
        let audio = Arc::new(audio_decoder::decode_wav(
            audio_bytes,
            self.config.audio.max_file_size_bytes,
        )?);
        log::info!(
            "音声処理開始: {} サンプル, {}Hz, 強調 {} ({:?})",
            audio.len(),
            audio.sample_rate(),
            if options.enable_enhancement { "有効" } else { "無効" },
            options.level
        );

        let timeouts = &self.config.pipeline;
        let features_task = {
            let audio = Arc::clone(&audio);
            let audio_config = self.config.audio.clone();
            tokio::task::spawn_blocking(move || signal::extract_features(&audio, &audio_config))
        };
        let vad_task = {
            let audio = Arc::clone(&audio);
            let aggressiveness = options.vad_aggressiveness;
            tokio::task::spawn_blocking(move || {
                VoiceActivityDetector::new(aggressiveness).and_then(|detector| detector.detect(&audio))
            })
        };
        let enhancement_task = options.enable_enhancement.then(|| {
            let audio = Arc::clone(&audio);
            let enhancer = AudioEnhancer::new(&self.config.enhancement, self.config.audio.silence_threshold);
            let target_rate = options.level.sample_rate();
            tokio::task::spawn_blocking(move || enhancer.enhance(&audio, target_rate))
        });

        let enhancement_wait = async {
            match enhancement_task {
                Some(handle) => Some(join_with_timeout(handle, timeouts.enhancement_timeout_secs, "音声強調").await),
                None => None,
            }
        };
        let (features, vad_result, enhancement) = tokio::join!(
            join_with_timeout(features_task, timeouts.feature_timeout_secs, "特徴量抽出"),
            join_with_timeout(vad_task, timeouts.vad_timeout_secs, "音声区間検出"),
            enhancement_wait,
        );

        let mut pipeline_issues = BTreeSet::new();

        let (original_metrics, features) =
            resolve_features(features, &audio, self.config.audio.silence_threshold);
        if features.is_none() {
            pipeline_issues.insert(QualityIssue::FeatureExtractionFailed);
        }

        let (vad_stats, segments) = match vad_result {
            Ok(result) => (result.statistics, result.segments),
            Err(_) => {
                pipeline_issues.insert(QualityIssue::SpeechDetectionFailed);
                (
                    vad::estimate_from_silence_ratio(audio.duration_seconds(), original_metrics.silence_ratio),
                    Vec::new(),
                )
            }
        };

        let enhancement: Option<EnhancementResult> = match enhancement {
            Some(Ok(result)) => Some(result),
            Some(Err(_)) => {
                pipeline_issues.insert(QualityIssue::EnhancementFailed);
                None
            }
            None => None,
        };

        let quality_score = enhancement
            .as_ref()
            .map(|e| e.quality_score)
            .unwrap_or(UNENHANCED_QUALITY_SCORE);
        let temperature = temperature_for_quality(quality_score);
        let transcription_audio: &AudioSample = match &enhancement {
            Some(result) => &result.enhanced_audio,
            None => audio.as_ref(),
        };

        let transcription = self
            .transcribe(transcription_audio, options.language.as_deref(), temperature)
            .await;
        if transcription.is_none() {
            pipeline_issues.insert(QualityIssue::TranscriptionFailed);
        }

        let snr_improvement = enhancement.as_ref().map(EnhancementResult::snr_improvement);
        let mut assessment = QualityAssessor::new(&self.config.quality).assess(&QualityInputs {
            metrics: original_metrics,
            vad: vad_stats,
            snr_improvement,
            transcription_confidence: transcription.as_ref().map(|t| t.confidence).unwrap_or(0.0),
        });
        assessment.issues.extend(pipeline_issues);

        let enhancement_applied = enhancement.is_some();
        let recommendations =
            quality::recommendations(&assessment.issues, assessment.overall_score, enhancement_applied);

        let processing_time_seconds = started.elapsed().as_secs_f64();
        log::info!(
            "音声処理完了: 総合スコア {:.2} ({:?}), 問題点 {} 件, {:.2}秒",
            assessment.overall_score,
            assessment.grade,
            assessment.issues.len(),
            processing_time_seconds
        );

        Ok(ProcessingReport {
            transcription,
            details: ProcessingDetails {
                original_metrics,
                features,
                vad: vad_stats,
                segments,
                enhancement_applied,
                enhancement_level: options.level,
                enhanced_metrics: enhancement.as_ref().map(|e| e.metrics_after),
                snr_improvement,
                enhancement_quality_score: enhancement.as_ref().map(|e| e.quality_score),
                transcription_temperature: temperature,
                processing_time_seconds,
            },
            quality_assessment: assessment,
            recommendations,
            enhanced_audio: enhancement.map(|e| e.enhanced_audio),
        })
    }

    async fn transcribe(
        &self,
        audio: &AudioSample,
        language: Option<&str>,
        temperature: f32,
    ) -> Option<TranscriptionResult> {
        let Some(transcriber) = &self.transcriber else {
            log::warn!("[transcription] 文字起こしバックエンドが設定されていません");
            return None;
        };

        log::info!(
            "[transcription] {} で文字起こし開始 ({} サンプル, temperature {})",
            transcriber.name(),
            audio.len(),
            temperature
        );
        match transcriber.transcribe(audio, language, temperature).await {
            Ok(result) => Some(result),
            Err(e) => {
                log::warn!(
                    "[transcription] 文字起こしに失敗 ({} サンプル): {}",
                    audio.len(),
                    e
                );
                None
            }
        }
    }
}

/// ブロッキングタスクの完了をタイムアウト付きで待つ
///
/// タイムアウトしたタスクは失敗扱いにするが、他のタスクは止めない。
async fn join_with_timeout<T, E: Display>(
    handle: JoinHandle<Result<T, E>>,
    timeout_secs: u64,
    stage: &str,
) -> Result<T, String> {
    let message = match tokio::time::timeout(Duration::from_secs(timeout_secs), handle).await {
        Ok(Ok(Ok(value))) => return Ok(value),
        Ok(Ok(Err(e))) => e.to_string(),
        Ok(Err(join_err)) => format!("タスクが異常終了: {}", join_err),
        Err(_) => format!("{}秒でタイムアウト", timeout_secs),
    };
    log::warn!("[{}] 失敗したためフォールバックします: {}", stage, message);
    Err(message)
}

/// 特徴量抽出の結果から基本指標を決める
///
/// 失敗時は元音声から基本指標だけを計算する。
fn resolve_features(
    result: Result<AudioFeatures, String>,
    audio: &AudioSample,
    silence_threshold: f64,
) -> (QualityMetrics, Option<AudioFeatures>) {
    match result {
        Ok(features) => (features.quality_metrics(), Some(features)),
        Err(_) => (signal::quality_metrics(audio.samples(), silence_threshold), None),
    }
}
