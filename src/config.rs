use crate::types::EnhancementLevel;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// アプリケーション設定
///
/// プロセス起動時に一度だけ構築し、各コンポーネントのコンストラクタへ
/// 参照で渡す。ライブラリ内部からグローバルに参照することはない。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub enhancement: EnhancementConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub whisper: Option<WhisperConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

/// 音声入力・特徴量抽出の設定
///
/// # デフォルト値
///
/// - `feature_sample_rate`: 22050 Hz (特徴量抽出時のサンプリングレート)
/// - `silence_threshold`: 0.01 (無音とみなす振幅)
/// - `max_file_size_bytes`: 25 MiB (Whisper API の上限)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AudioConfig {
    #[serde(default = "default_feature_sample_rate")]
    pub feature_sample_rate: u32,
    #[serde(default = "default_silence_threshold")]
    pub silence_threshold: f64,
    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: usize,
}

/// VAD (Voice Activity Detection) 設定
///
/// # デフォルト値
///
/// - `aggressiveness`: 2 (0-3、大きいほど音声判定が厳しい)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VadConfig {
    #[serde(default = "default_aggressiveness")]
    pub aggressiveness: u8,
}

/// 音声強調の設定
///
/// # デフォルト値
///
/// - `enabled`: true
/// - `level`: balanced
/// - `prop_decrease`: 0.8 (ノイズ低減の強さ、0.0-1.0)
/// - `time_constant_s`: 2.0 秒 (非定常ノイズ推定の平滑化時定数)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EnhancementConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub level: EnhancementLevel,
    #[serde(default = "default_prop_decrease")]
    pub prop_decrease: f32,
    #[serde(default = "default_time_constant_s")]
    pub time_constant_s: f32,
}

/// 並行タスクのタイムアウト設定
///
/// 音声強調は最も重い処理なので最も長い猶予を持つ。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    #[serde(default = "default_enhancement_timeout_secs")]
    pub enhancement_timeout_secs: u64,
    #[serde(default = "default_feature_timeout_secs")]
    pub feature_timeout_secs: u64,
    #[serde(default = "default_vad_timeout_secs")]
    pub vad_timeout_secs: u64,
}

/// 品質スコアの重み
///
/// 合計が 1.0 になるように設定する。
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq)]
pub struct QualityWeights {
    pub snr: f64,
    pub speech_content: f64,
    pub dynamic_range: f64,
    pub transcription_confidence: f64,
    pub enhancement_effectiveness: f64,
}

/// 重みの合計の許容誤差
const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

impl QualityWeights {
    pub fn sum(&self) -> f64 {
        self.snr
            + self.speech_content
            + self.dynamic_range
            + self.transcription_confidence
            + self.enhancement_effectiveness
    }
}

/// 品質評価の閾値
///
/// 経験的な値なので設定で差し替えられるようにしている。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default = "default_snr_high_db")]
    pub snr_high_db: f64,
    #[serde(default = "default_snr_mid_db")]
    pub snr_mid_db: f64,
    #[serde(default = "default_snr_low_db")]
    pub snr_low_db: f64,
    #[serde(default = "default_enhancement_high_db")]
    pub enhancement_high_db: f64,
    #[serde(default = "default_enhancement_mid_db")]
    pub enhancement_mid_db: f64,
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
    /// 音声比率の帯域 (高・中・低)
    #[serde(default = "default_speech_high_ratio")]
    pub speech_high_ratio: f64,
    #[serde(default = "default_speech_mid_ratio")]
    pub speech_mid_ratio: f64,
    #[serde(default = "default_speech_low_ratio")]
    pub speech_low_ratio: f64,
    /// ダイナミックレンジの帯域 (高・中)
    #[serde(default = "default_dynamic_range_high")]
    pub dynamic_range_high: f64,
    #[serde(default = "default_dynamic_range_mid")]
    pub dynamic_range_mid: f64,
    /// 強調を行わなかった場合に使う中立スコア
    #[serde(default = "default_neutral_score")]
    pub neutral_score: f64,
    #[serde(default = "default_weights")]
    pub weights: QualityWeights,
}

/// テキスト生成 API (OpenAI Chat Completions) 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// OpenAI API Key（空の場合は環境変数 OPENAI_API_KEY を参照）
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_analysis_temperature")]
    pub analysis_temperature: f32,
    #[serde(default = "default_analysis_max_tokens")]
    pub analysis_max_tokens: u32,
    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,
    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,
}

/// OpenAI Whisper API 設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WhisperConfig {
    /// OpenAI API Key
    #[serde(default)]
    pub api_key: String,
    /// Whisper モデル名（通常 "whisper-1"）
    #[serde(default = "default_whisper_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 言語コード（"ja", "en" など）。省略時は自動判定
    pub language: Option<String>,
    #[serde(default = "default_whisper_timeout_seconds")]
    pub timeout_seconds: u64,
}

/// 出力設定
///
/// # デフォルト値
///
/// - `output_dir`: "./output"
/// - `log_level`: "info"
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// Default functions
fn default_feature_sample_rate() -> u32 {
    22050
}

fn default_silence_threshold() -> f64 {
    0.01
}

fn default_max_file_size_bytes() -> usize {
    25 * 1024 * 1024
}

fn default_aggressiveness() -> u8 {
    2
}

fn default_enabled() -> bool {
    true
}

fn default_prop_decrease() -> f32 {
    0.8
}

fn default_time_constant_s() -> f32 {
    2.0
}

fn default_enhancement_timeout_secs() -> u64 {
    300
}

fn default_feature_timeout_secs() -> u64 {
    120
}

fn default_vad_timeout_secs() -> u64 {
    120
}

fn default_snr_high_db() -> f64 {
    20.0
}

fn default_snr_mid_db() -> f64 {
    10.0
}

fn default_snr_low_db() -> f64 {
    0.0
}

fn default_enhancement_high_db() -> f64 {
    5.0
}

fn default_enhancement_mid_db() -> f64 {
    2.0
}

fn default_confidence_threshold() -> f64 {
    0.6
}

fn default_speech_high_ratio() -> f64 {
    0.7
}

fn default_speech_mid_ratio() -> f64 {
    0.4
}

fn default_speech_low_ratio() -> f64 {
    0.2
}

fn default_dynamic_range_high() -> f64 {
    0.5
}

fn default_dynamic_range_mid() -> f64 {
    0.2
}

fn default_neutral_score() -> f64 {
    0.5
}

fn default_weights() -> QualityWeights {
    QualityWeights {
        snr: 0.30,
        speech_content: 0.25,
        dynamic_range: 0.15,
        transcription_confidence: 0.20,
        enhancement_effectiveness: 0.10,
    }
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_llm_timeout_seconds() -> u64 {
    60
}

fn default_analysis_temperature() -> f32 {
    0.3
}

fn default_analysis_max_tokens() -> u32 {
    1000
}

fn default_generation_temperature() -> f32 {
    0.4
}

fn default_generation_max_tokens() -> u32 {
    2000
}

fn default_whisper_model() -> String {
    "whisper-1".to_string()
}

fn default_whisper_timeout_seconds() -> u64 {
    120
}

fn default_output_dir() -> String {
    "./output".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            vad: VadConfig::default(),
            enhancement: EnhancementConfig::default(),
            pipeline: PipelineConfig::default(),
            quality: QualityConfig::default(),
            llm: LlmConfig::default(),
            whisper: None, // デフォルトではWhisper設定なし
            output: OutputConfig::default(),
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            feature_sample_rate: default_feature_sample_rate(),
            silence_threshold: default_silence_threshold(),
            max_file_size_bytes: default_max_file_size_bytes(),
        }
    }
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            aggressiveness: default_aggressiveness(),
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: EnhancementLevel::default(),
            prop_decrease: default_prop_decrease(),
            time_constant_s: default_time_constant_s(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enhancement_timeout_secs: default_enhancement_timeout_secs(),
            feature_timeout_secs: default_feature_timeout_secs(),
            vad_timeout_secs: default_vad_timeout_secs(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            snr_high_db: default_snr_high_db(),
            snr_mid_db: default_snr_mid_db(),
            snr_low_db: default_snr_low_db(),
            enhancement_high_db: default_enhancement_high_db(),
            enhancement_mid_db: default_enhancement_mid_db(),
            confidence_threshold: default_confidence_threshold(),
            speech_high_ratio: default_speech_high_ratio(),
            speech_mid_ratio: default_speech_mid_ratio(),
            speech_low_ratio: default_speech_low_ratio(),
            dynamic_range_high: default_dynamic_range_high(),
            dynamic_range_mid: default_dynamic_range_mid(),
            neutral_score: default_neutral_score(),
            weights: default_weights(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_llm_model(),
            base_url: default_base_url(),
            timeout_seconds: default_llm_timeout_seconds(),
            analysis_temperature: default_analysis_temperature(),
            analysis_max_tokens: default_analysis_max_tokens(),
            generation_temperature: default_generation_temperature(),
            generation_max_tokens: default_generation_max_tokens(),
        }
    }
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_whisper_model(),
            base_url: default_base_url(),
            language: None,
            timeout_seconds: default_whisper_timeout_seconds(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// 設定ファイルから読み込み
    ///
    /// TOML形式の設定ファイルをパースしてConfig構造体を生成する。
    ///
    /// # Errors
    ///
    /// ファイルの読み込みまたはパースに失敗した場合、
    /// または [`Config::validate`] を満たさない場合にエラーを返す。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use voice_docgen::config::Config;
    /// let config = Config::from_file("config.toml").unwrap();
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path.as_ref()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "設定ファイルのパースに失敗")?;
        config
            .validate()
            .with_context(|| format!("設定値が不正です: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// 設定値の整合性を検査
    ///
    /// 品質スコアの重みの合計は 1.0 でなければならない。
    pub fn validate(&self) -> Result<()> {
        let weights = &self.quality.weights;
        let sum = weights.sum();
        ensure!(
            (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE,
            "quality.weights の合計が 1.0 ではありません: {}",
            sum
        );
        ensure!(
            [
                weights.snr,
                weights.speech_content,
                weights.dynamic_range,
                weights.transcription_confidence,
                weights.enhancement_effectiveness,
            ]
            .iter()
            .all(|&w| w >= 0.0),
            "quality.weights に負の値があります"
        );
        Ok(())
    }

    /// デフォルト設定をファイルに書き出し
    ///
    /// 既存のファイルは上書きされる。
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use voice_docgen::config::Config;
    /// Config::write_default("config.toml").unwrap();
    /// ```
    pub fn write_default<P: AsRef<Path>>(path: P) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).with_context(|| "設定のシリアライズに失敗")?;
        fs::write(path.as_ref(), content)
            .with_context(|| format!("設定ファイルの書き込みに失敗: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// 設定ファイルがあれば読み込み、なければデフォルトを使用
    ///
    /// # Errors
    ///
    /// ファイルが存在するがパースに失敗した場合にエラーを返す。
    /// ファイルが存在しない場合はエラーにならず、デフォルト設定を返す。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            log::warn!(
                "設定ファイルが見つかりません。デフォルト設定を使用します: {:?}",
                path.as_ref()
            );
            Ok(Config::default())
        }
    }

    /// 環境変数で API キーを補完
    ///
    /// 設定ファイルの `api_key` が空の場合のみ OPENAI_API_KEY の値を使う。
    pub fn apply_env_overrides(&mut self) {
        self.apply_api_key(std::env::var("OPENAI_API_KEY").ok());
    }

    fn apply_api_key(&mut self, key: Option<String>) {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return;
        };
        if self.llm.api_key.is_empty() {
            self.llm.api_key = key.clone();
        }
        if let Some(whisper) = self.whisper.as_mut() {
            if whisper.api_key.is_empty() {
                whisper.api_key = key;
            }
        }
    }
}
