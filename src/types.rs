use serde::{Deserialize, Serialize};

/// 16ビット整数型のオーディオサンプル
///
/// WAV 書き出し時の PCM 形式。-32768 から 32767 の範囲の値を取る。
pub type SampleI16 = i16;

/// モノラル音声サンプル列
///
/// -1.0 ~ 1.0 に正規化された浮動小数点サンプルとサンプリングレートを保持する。
/// 読み込み後は不変で、並行タスク間では `Arc` で共有する。
///
/// # Examples
///
/// ```
/// # use voice_docgen::types::AudioSample;
/// let audio = AudioSample::new(vec![0.0; 16000], 16000);
/// assert_eq!(audio.duration_seconds(), 1.0);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct AudioSample {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl AudioSample {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 音声の長さ（秒）
    pub fn duration_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// 音声品質の基本指標
///
/// 1つの音声サンプルに対して一度だけ計算される読み取り専用の値。
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// SNR 推定値 (dB, -50 ~ 50 にクランプ)
    pub snr_db: f64,
    /// 全体の RMS
    pub rms: f64,
    /// 最大値 - 最小値
    pub dynamic_range: f64,
    /// 閾値未満の振幅を持つサンプルの割合
    pub silence_ratio: f64,
}

/// 音声区間
///
/// VAD が出力する区間リストは開始時刻順にソートされ、互いに重ならない。
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SpeechSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub duration_seconds: f64,
}

impl SpeechSegment {
    pub fn new(start_seconds: f64, end_seconds: f64) -> Self {
        Self {
            start_seconds,
            end_seconds,
            duration_seconds: end_seconds - start_seconds,
        }
    }
}

/// VAD の集計統計
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VadStatistics {
    pub total_duration: f64,
    pub speech_duration: f64,
    pub silence_duration: f64,
    /// speech_duration / total_duration (total_duration = 0 のときは 0)
    pub speech_ratio: f64,
    pub num_segments: usize,
    pub aggressiveness: u8,
}

/// VAD の出力
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VadResult {
    pub segments: Vec<SpeechSegment>,
    pub statistics: VadStatistics,
}

/// VAD（Voice Activity Detection）の状態
///
/// ハングオーバー機構により、音声が途切れてもすぐには
/// 無音状態に遷移しない。
///
/// # Examples
///
/// ```
/// # use voice_docgen::types::VadState;
/// // 無音状態
/// let state = VadState::Silence;
///
/// // 音声状態（ハングオーバー残り60ms）
/// let state = VadState::Voice { hangover_remaining_ms: 60 };
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VadState {
    /// 無音状態
    Silence,

    /// 音声状態
    ///
    /// ハングオーバー残り時間（ミリ秒）を保持する。
    Voice {
        /// ハングオーバー残り時間（ミリ秒）
        hangover_remaining_ms: u32,
    },
}

/// 音声強調の強度
///
/// 強調時のサンプリングレートと VAD の aggressiveness を決める。
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnhancementLevel {
    Minimal,
    #[default]
    Balanced,
    Aggressive,
}

impl EnhancementLevel {
    /// 強調処理で使うサンプリングレート
    pub fn sample_rate(self) -> u32 {
        match self {
            EnhancementLevel::Minimal => 8000,
            EnhancementLevel::Balanced | EnhancementLevel::Aggressive => 16000,
        }
    }

    /// VAD の aggressiveness
    pub fn vad_aggressiveness(self) -> u8 {
        match self {
            EnhancementLevel::Minimal => 1,
            EnhancementLevel::Balanced => 2,
            EnhancementLevel::Aggressive => 3,
        }
    }
}

impl std::str::FromStr for EnhancementLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "minimal" => Ok(EnhancementLevel::Minimal),
            "balanced" => Ok(EnhancementLevel::Balanced),
            "aggressive" => Ok(EnhancementLevel::Aggressive),
            other => Err(format!("未対応の強調レベル: {}", other)),
        }
    }
}

/// 文字起こし結果
///
/// 文字起こし API の結果。品質評価より下流ではテキストとして扱う。
///
/// # JSON出力例
///
/// ```json
/// {
///   "text": "Team meeting about Q3 roadmap.",
///   "language": "en",
///   "duration_seconds": 4.2,
///   "confidence": 0.8,
///   "model": "whisper-1",
///   "temperature": 0.0
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// 文字起こしテキスト
    pub text: String,

    /// 言語コード（ベストエフォート）
    pub language: String,

    /// 音声の長さ（秒）
    pub duration_seconds: f64,

    /// 信頼度 (0.0 ~ 1.0)
    pub confidence: f64,

    /// 使用したモデル名
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// 使用した temperature
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}
