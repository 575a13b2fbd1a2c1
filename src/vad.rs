use crate::audio_decoder;
use crate::config::VadConfig;
use crate::error::VadError;
use crate::types::{AudioSample, SpeechSegment, VadResult, VadState, VadStatistics};

/// VAD が処理するサンプリングレート (Hz)
pub const VAD_SAMPLE_RATE: u32 = 16000;

/// フレーム長 (ミリ秒)
pub const FRAME_MS: u32 = 30;

const FRAME_SAMPLES: usize = (VAD_SAMPLE_RATE * FRAME_MS / 1000) as usize;

/// aggressiveness ごとのノイズフロアからのマージン (dB)
const FLOOR_MARGIN_DB: [f32; 4] = [6.0, 9.0, 12.0, 15.0];

/// aggressiveness ごとの絶対的な最小レベル (dB)
const ABSOLUTE_MIN_DB: [f32; 4] = [-55.0, -50.0, -45.0, -40.0];

/// aggressiveness ごとのハングオーバー期間 (ミリ秒)
const HANGOVER_MS: [u32; 4] = [90, 60, 30, 0];

/// ノイズフロア推定値の上限 (dB)
///
/// 全体が音声で埋まった入力でもフロアが音声レベルまで上がらないようにする。
const NOISE_FLOOR_CAP_DB: f32 = -35.0;

/// Voice Activity Detector (音声区間検出器)
///
/// RMS ベースのフレーム分類器。16kHz モノラル音声を 30ms フレームに分割し、
/// 各フレームを音声/非音声に分類して連続する音声フレームを区間にまとめる。
///
/// # アルゴリズム
///
/// 1. 16kHz へリサンプリング
/// 2. 30ms (480サンプル) ごとに RMS を計算し、デシベル (dB) に変換
/// 3. フレーム dB の10パーセンタイルをノイズフロアとし、
///    aggressiveness に応じたマージンを加えて閾値を決める
/// 4. 閾値と比較して音声/無音を判定
/// 5. ハングオーバー機構により急激な変化を抑制
/// 6. 末尾で開いたままの区間は音声の終端時刻で閉じる
///
/// aggressiveness が大きいほどマージンが大きく、ハングオーバーが短い
/// （音声判定が厳しい）。同じ入力と aggressiveness に対して結果は決定的。
///
/// # Examples
///
/// ```
/// # use voice_docgen::vad::VoiceActivityDetector;
/// # use voice_docgen::types::AudioSample;
/// let vad = VoiceActivityDetector::new(2).unwrap();
///
/// // 無音サンプル（1秒）
/// let silence = AudioSample::new(vec![0.0; 16000], 16000);
/// let result = vad.detect(&silence).unwrap();
/// assert!(result.segments.is_empty());
/// assert_eq!(result.statistics.speech_ratio, 0.0);
/// ```
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    aggressiveness: u8,

    /// ハングオーバー期間 (ミリ秒)
    ///
    /// 音声終了後もこの期間は音声状態を維持する
    hangover_duration_ms: u32,
}

impl VoiceActivityDetector {
    /// # Errors
    ///
    /// aggressiveness が 0-3 の範囲外の場合 `VadError::InvalidAggressiveness`
    pub fn new(aggressiveness: u8) -> Result<Self, VadError> {
        let level = aggressiveness as usize;
        if level >= HANGOVER_MS.len() {
            return Err(VadError::InvalidAggressiveness(aggressiveness));
        }
        Ok(Self {
            aggressiveness,
            hangover_duration_ms: HANGOVER_MS[level],
        })
    }

    pub fn from_config(config: &VadConfig) -> Result<Self, VadError> {
        Self::new(config.aggressiveness)
    }

    pub fn aggressiveness(&self) -> u8 {
        self.aggressiveness
    }

    /// 音声区間を検出する
    ///
    /// 1フレームに満たない音声は区間なし・speech_ratio 0 となる。
    pub fn detect(&self, audio: &AudioSample) -> Result<VadResult, VadError> {
        if audio.is_empty() {
            return Ok(self.summarize(Vec::new(), 0.0));
        }

        let audio = audio_decoder::resample(audio, VAD_SAMPLE_RATE)?;
        let total_duration = audio.duration_seconds();

        let frame_db: Vec<f32> = audio
            .samples()
            .chunks_exact(FRAME_SAMPLES)
            .map(|frame| rms_to_db(calculate_rms(frame)))
            .collect();

        if frame_db.is_empty() {
            return Ok(self.summarize(Vec::new(), total_duration));
        }

        let threshold_db = self.threshold_db(&frame_db);
        log::debug!(
            "VAD: {}フレーム, 閾値 {:.1} dB (aggressiveness {})",
            frame_db.len(),
            threshold_db,
            self.aggressiveness
        );

        let frame_seconds = FRAME_MS as f64 / 1000.0;
        let mut state = VadState::Silence;
        let mut segments = Vec::new();
        let mut open_start: Option<f64> = None;

        for (index, &db) in frame_db.iter().enumerate() {
            let timestamp = index as f64 * frame_seconds;
            state = self.next_state(state, db > threshold_db, db);

            match (state, open_start) {
                (VadState::Voice { .. }, None) => open_start = Some(timestamp),
                (VadState::Silence, Some(start)) => {
                    segments.push(SpeechSegment::new(start, timestamp));
                    open_start = None;
                }
                _ => {}
            }
        }

        // 末尾で開いたままの区間は終端で閉じる
        if let Some(start) = open_start {
            segments.push(SpeechSegment::new(start, total_duration));
        }

        Ok(self.summarize(segments, total_duration))
    }

    /// フレーム dB 列から音声判定の閾値を決める
    fn threshold_db(&self, frame_db: &[f32]) -> f32 {
        let mut sorted = frame_db.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let floor = sorted[(sorted.len() - 1) / 10].min(NOISE_FLOOR_CAP_DB);

        let level = self.aggressiveness as usize;
        (floor + FLOOR_MARGIN_DB[level]).max(ABSOLUTE_MIN_DB[level])
    }

    /// 状態遷移
    fn next_state(&self, state: VadState, is_voice_detected: bool, db: f32) -> VadState {
        match state {
            VadState::Silence => {
                if is_voice_detected {
                    log::trace!("VAD: 音声開始検出 (RMS: {:.2} dB)", db);
                    VadState::Voice {
                        hangover_remaining_ms: self.hangover_duration_ms,
                    }
                } else {
                    VadState::Silence
                }
            }
            VadState::Voice {
                hangover_remaining_ms,
            } => {
                if is_voice_detected {
                    // 音声が継続している場合、ハングオーバーをリセット
                    VadState::Voice {
                        hangover_remaining_ms: self.hangover_duration_ms,
                    }
                } else if hangover_remaining_ms > FRAME_MS {
                    VadState::Voice {
                        hangover_remaining_ms: hangover_remaining_ms - FRAME_MS,
                    }
                } else {
                    log::trace!("VAD: 音声終了検出 (RMS: {:.2} dB)", db);
                    VadState::Silence
                }
            }
        }
    }

    fn summarize(&self, segments: Vec<SpeechSegment>, total_duration: f64) -> VadResult {
        let speech_duration: f64 = segments.iter().map(|s| s.duration_seconds).sum();
        let speech_duration = speech_duration.min(total_duration);
        let speech_ratio = if total_duration > 0.0 {
            speech_duration / total_duration
        } else {
            0.0
        };

        VadResult {
            statistics: VadStatistics {
                total_duration,
                speech_duration,
                silence_duration: total_duration - speech_duration,
                speech_ratio,
                num_segments: segments.len(),
                aggressiveness: self.aggressiveness,
            },
            segments,
        }
    }
}

/// VAD が使えない場合の統計推定
///
/// 無音率から音声の割合を見積もる。区間リストは空。
pub fn estimate_from_silence_ratio(total_duration: f64, silence_ratio: f64) -> VadStatistics {
    let speech_ratio = (1.0 - silence_ratio).clamp(0.0, 1.0);
    let speech_duration = total_duration * speech_ratio;
    VadStatistics {
        total_duration,
        speech_duration,
        silence_duration: total_duration - speech_duration,
        speech_ratio,
        num_segments: 0,
        aggressiveness: 0,
    }
}

/// RMS (Root Mean Square) を計算
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_of_squares: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    let mean_square = sum_of_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

/// RMSをデシベル (dB) に変換
fn rms_to_db(rms: f32) -> f32 {
    if rms <= 0.0 {
        return -100.0; // 無音の場合の最小値
    }
    20.0 * rms.log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// 指定区間 (秒) だけトーンを鳴らす 16kHz の音声
    fn bursts(total_seconds: f32, ranges: &[(f32, f32)]) -> AudioSample {
        let n = (total_seconds * VAD_SAMPLE_RATE as f32) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / VAD_SAMPLE_RATE as f32;
                if ranges.iter().any(|&(s, e)| t >= s && t < e) {
                    (2.0 * PI * 220.0 * t).sin() * 0.5
                } else {
                    0.0
                }
            })
            .collect();
        AudioSample::new(samples, VAD_SAMPLE_RATE)
    }

    fn assert_sorted_non_overlapping(segments: &[SpeechSegment]) {
        for pair in segments.windows(2) {
            assert!(pair[0].end_seconds <= pair[1].start_seconds);
        }
        for s in segments {
            assert!(s.start_seconds <= s.end_seconds);
        }
    }

    fn assert_statistics_consistent(stats: &VadStatistics) {
        assert!((0.0..=1.0).contains(&stats.speech_ratio));
        assert!(
            (stats.speech_duration + stats.silence_duration - stats.total_duration).abs() < 1e-9
        );
    }

    #[test]
    fn test_invalid_aggressiveness() {
        assert!(matches!(
            VoiceActivityDetector::new(4),
            Err(VadError::InvalidAggressiveness(4))
        ));
        assert!(VoiceActivityDetector::new(0).is_ok());
        assert!(VoiceActivityDetector::new(3).is_ok());
    }

    #[test]
    fn test_silence_detection() {
        let vad = VoiceActivityDetector::new(2).unwrap();
        let result = vad.detect(&bursts(1.0, &[])).unwrap();

        assert!(result.segments.is_empty());
        assert_eq!(result.statistics.speech_ratio, 0.0);
        assert!((result.statistics.total_duration - 1.0).abs() < 1e-9);
        assert_statistics_consistent(&result.statistics);
    }

    #[test]
    fn test_short_audio_yields_no_segments() {
        let vad = VoiceActivityDetector::new(2).unwrap();
        let audio = AudioSample::new(vec![0.5; FRAME_SAMPLES - 1], VAD_SAMPLE_RATE);
        let result = vad.detect(&audio).unwrap();

        assert!(result.segments.is_empty());
        assert_eq!(result.statistics.speech_ratio, 0.0);
        assert_statistics_consistent(&result.statistics);
    }

    #[test]
    fn test_empty_audio() {
        let vad = VoiceActivityDetector::new(1).unwrap();
        let result = vad.detect(&AudioSample::new(vec![], VAD_SAMPLE_RATE)).unwrap();
        assert!(result.segments.is_empty());
        assert_eq!(result.statistics.total_duration, 0.0);
        assert_eq!(result.statistics.speech_ratio, 0.0);
    }

    #[test]
    fn test_two_bursts_give_two_segments() {
        let vad = VoiceActivityDetector::new(3).unwrap();
        let result = vad
            .detect(&bursts(3.0, &[(0.5, 1.0), (1.8, 2.4)]))
            .unwrap();

        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.statistics.num_segments, 2);
        assert_sorted_non_overlapping(&result.segments);
        assert_statistics_consistent(&result.statistics);

        let first = result.segments[0];
        assert!((first.start_seconds - 0.5).abs() < 0.04, "{:?}", first);
        assert!((first.end_seconds - 1.0).abs() < 0.04, "{:?}", first);
        assert!(result.statistics.speech_ratio > 0.3 && result.statistics.speech_ratio < 0.45);
    }

    #[test]
    fn test_trailing_segment_closed_at_end() {
        let vad = VoiceActivityDetector::new(2).unwrap();
        // 1.0秒から最後まで音声（末尾は半端なフレームを含む）
        let audio = bursts(2.01, &[(1.0, 3.0)]);
        let result = vad.detect(&audio).unwrap();

        let last = result.segments.last().copied().unwrap();
        assert!((last.end_seconds - audio.duration_seconds()).abs() < 1e-9);
        assert_statistics_consistent(&result.statistics);
    }

    #[test]
    fn test_hangover_bridges_short_gap() {
        // 30ms の隙間は aggressiveness 0 (ハングオーバー 90ms) ではつながる
        let audio = bursts(2.0, &[(0.3, 0.9), (0.93, 1.5)]);

        let loose = VoiceActivityDetector::new(0).unwrap().detect(&audio).unwrap();
        assert_eq!(loose.segments.len(), 1);

        let strict = VoiceActivityDetector::new(3).unwrap().detect(&audio).unwrap();
        assert!(strict.segments.len() >= 1);
        assert!(strict.statistics.speech_duration <= loose.statistics.speech_duration);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let audio = bursts(2.0, &[(0.2, 0.7), (1.1, 1.6)]);
        let vad = VoiceActivityDetector::new(2).unwrap();
        assert_eq!(vad.detect(&audio).unwrap(), vad.detect(&audio).unwrap());
    }

    #[test]
    fn test_continuous_tone_is_all_speech() {
        let vad = VoiceActivityDetector::new(3).unwrap();
        let result = vad.detect(&bursts(1.0, &[(0.0, 1.0)])).unwrap();

        assert_eq!(result.segments.len(), 1);
        assert!((result.statistics.speech_ratio - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_resamples_other_rates() {
        let audio = bursts(1.0, &[(0.0, 1.0)]);
        let at_8k: Vec<f32> = audio.samples().iter().step_by(2).copied().collect();
        let vad = VoiceActivityDetector::new(2).unwrap();
        let result = vad.detect(&AudioSample::new(at_8k, 8000)).unwrap();

        assert!((result.statistics.total_duration - 1.0).abs() < 0.01);
        assert!(result.statistics.speech_ratio > 0.9);
    }

    #[test]
    fn test_rms_to_db() {
        let db = rms_to_db(0.1);
        assert!((db - (-20.0)).abs() < 0.001);
        assert_eq!(rms_to_db(0.0), -100.0);
    }

    #[test]
    fn test_rms_calculation() {
        let rms = calculate_rms(&[0.25; 480]);
        assert!((rms - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_estimate_from_silence_ratio() {
        let stats = estimate_from_silence_ratio(10.0, 0.3);
        assert!((stats.speech_ratio - 0.7).abs() < 1e-9);
        assert!((stats.speech_duration - 7.0).abs() < 1e-9);
        assert_statistics_consistent(&stats);
    }
}
