//! 音声強調
//!
//! 非定常スペクトルゲーティングによるノイズ低減とピーク正規化を行い、
//! 処理前後の品質指標を添えて返す。

use crate::audio_decoder;
use crate::config::EnhancementConfig;
use crate::dsp::{self, Complex};
use crate::error::EnhancementError;
use crate::signal;
use crate::types::{AudioSample, QualityMetrics};
use rayon::prelude::*;

const N_FFT: usize = 1024;
const HOP: usize = N_FFT / 4;

/// 時間平滑化した振幅の何倍を超えたら信号とみなすか
const THRESH_N_MULT: f32 = 2.0;

/// マスクのシグモイドの傾き
const SIGMOID_SLOPE: f32 = 10.0;

/// 正規化後のピーク振幅
const TARGET_PEAK: f32 = 1.0;

/// 強調結果
///
/// 強調後の音声は下流の文字起こしで元音声の代わりに使われる。
/// 元音声は比較のため呼び出し元が保持する。
#[derive(Clone, Debug, PartialEq)]
pub struct EnhancementResult {
    pub enhanced_audio: AudioSample,
    pub metrics_before: QualityMetrics,
    pub metrics_after: QualityMetrics,
    /// 処理後 SNR の線形変換 (0.0 ~ 1.0)
    pub quality_score: f64,
}

impl EnhancementResult {
    /// SNR の改善量 (dB)
    pub fn snr_improvement(&self) -> f64 {
        self.metrics_after.snr_db - self.metrics_before.snr_db
    }
}

/// 処理後 SNR から品質スコアを計算
///
/// `clamp((snr_db + 10) / 30, 0, 1)`
pub fn quality_score_from_snr(snr_db: f64) -> f64 {
    ((snr_db + 10.0) / 30.0).clamp(0.0, 1.0)
}

/// 音声強調器
#[derive(Debug, Clone)]
pub struct AudioEnhancer {
    prop_decrease: f32,
    time_constant_s: f32,
    silence_threshold: f64,
}

impl AudioEnhancer {
    pub fn new(config: &EnhancementConfig, silence_threshold: f64) -> Self {
        Self {
            prop_decrease: config.prop_decrease,
            time_constant_s: config.time_constant_s,
            silence_threshold,
        }
    }

    /// 音声を強調する
    ///
    /// 目標サンプリングレートへ変換してから処理する。内部でのリトライは行わない。
    ///
    /// # Errors
    ///
    /// - 空の音声やリサンプリング失敗は `EnhancementError::Audio`
    /// - 有限でないサンプルやパラメータ不正は `EnhancementError::InvalidInput`
    pub fn enhance(
        &self,
        audio: &AudioSample,
        target_rate: u32,
    ) -> Result<EnhancementResult, EnhancementError> {
        if !(0.0..=1.0).contains(&self.prop_decrease) {
            return Err(EnhancementError::InvalidInput(format!(
                "prop_decrease は 0.0-1.0 で指定してください: {}",
                self.prop_decrease
            )));
        }
        if self.time_constant_s <= 0.0 {
            return Err(EnhancementError::InvalidInput(format!(
                "time_constant_s は正の値で指定してください: {}",
                self.time_constant_s
            )));
        }
        if audio.samples().iter().any(|s| !s.is_finite()) {
            return Err(EnhancementError::InvalidInput(
                "有限でないサンプルが含まれています".to_string(),
            ));
        }

        let audio = audio_decoder::resample(audio, target_rate)?;
        let metrics_before = signal::quality_metrics(audio.samples(), self.silence_threshold);

        let denoised = self.reduce_noise(audio.samples(), audio.sample_rate());
        let normalized = normalize_peak(denoised);

        let metrics_after = signal::quality_metrics(&normalized, self.silence_threshold);
        let quality_score = quality_score_from_snr(metrics_after.snr_db);

        log::info!(
            "音声強調完了: {}Hz, SNR {:.1}dB -> {:.1}dB, 品質スコア {:.2}",
            target_rate,
            metrics_before.snr_db,
            metrics_after.snr_db,
            quality_score
        );

        Ok(EnhancementResult {
            enhanced_audio: AudioSample::new(normalized, audio.sample_rate()),
            metrics_before,
            metrics_after,
            quality_score,
        })
    }

    /// 非定常スペクトルゲーティング
    ///
    /// 各周波数ビンの振幅を時間方向に平滑化したものを局所的なノイズ推定とし、
    /// それを大きく上回る成分だけを通すマスクをかける。
    fn reduce_noise(&self, samples: &[f32], sample_rate: u32) -> Vec<f32> {
        let spectra = dsp::stft(samples, N_FFT, HOP);
        if spectra.is_empty() {
            return samples.to_vec();
        }

        let bins = spectra[0].len();
        let frames = spectra.len();
        let coeff = smoothing_coefficient(self.time_constant_s, sample_rate, HOP);

        // ビンごとに時間方向の平滑化とマスク計算を行う
        let masks: Vec<Vec<f32>> = (0..bins)
            .into_par_iter()
            .map(|bin| {
                let magnitude: Vec<f32> = spectra.iter().map(|frame| frame[bin].norm()).collect();
                let smooth = filtfilt_one_pole(&magnitude, coeff);
                magnitude
                    .iter()
                    .zip(&smooth)
                    .map(|(&m, &s)| {
                        let slowness = (m - s * THRESH_N_MULT) / (s + 1e-6);
                        let gate = sigmoid(slowness * SIGMOID_SLOPE);
                        gate * self.prop_decrease + (1.0 - self.prop_decrease)
                    })
                    .collect()
            })
            .collect();

        let gated: Vec<Vec<Complex>> = (0..frames)
            .map(|f| {
                spectra[f]
                    .iter()
                    .enumerate()
                    .map(|(bin, c)| c.scale(masks[bin][f]))
                    .collect()
            })
            .collect();

        dsp::istft(&gated, N_FFT, HOP, samples.len())
    }
}

/// 1次 IIR ローパスの係数
///
/// 時定数をフレーム数に換算して求める。
fn smoothing_coefficient(time_constant_s: f32, sample_rate: u32, hop: usize) -> f32 {
    let t_frames = time_constant_s * sample_rate as f32 / hop as f32;
    let t2 = t_frames * t_frames;
    ((1.0 + 4.0 * t2).sqrt() - 1.0) / (2.0 * t2)
}

/// 1次 IIR ローパスを前後方向にかける（位相ずれなし）
fn filtfilt_one_pole(x: &[f32], b: f32) -> Vec<f32> {
    let run = |input: &mut dyn Iterator<Item = f32>| -> Vec<f32> {
        let mut out = Vec::with_capacity(x.len());
        let mut y: Option<f32> = None;
        for v in input {
            let next = match y {
                Some(prev) => b * v + (1.0 - b) * prev,
                None => v,
            };
            out.push(next);
            y = Some(next);
        }
        out
    };

    let forward = run(&mut x.iter().copied());
    let mut backward = run(&mut forward.iter().rev().copied());
    backward.reverse();
    backward
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// ピーク振幅で正規化
///
/// 無音（ピーク 0）の場合はそのまま返す。
fn normalize_peak(mut samples: Vec<f32>) -> Vec<f32> {
    let peak = samples.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
    if peak > 0.0 {
        let gain = TARGET_PEAK / peak;
        for s in samples.iter_mut() {
            *s *= gain;
        }
    }
    samples
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AudioError;
    use std::f32::consts::PI;

    fn enhancer() -> AudioEnhancer {
        AudioEnhancer::new(&EnhancementConfig::default(), 0.01)
    }

    fn noise(n: usize, amplitude: f32, seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                ((state >> 33) as f32 / (1u64 << 31) as f32 * 2.0 - 1.0) * amplitude
            })
            .collect()
    }

    /// 1.0-1.5秒だけトーンがある、低レベルのノイズに埋もれた音声
    fn noisy_burst() -> AudioSample {
        let sr = 16000;
        let mut samples = noise(sr * 3, 0.02, 11);
        for (i, s) in samples.iter_mut().enumerate().take(sr * 3 / 2).skip(sr) {
            *s += (2.0 * PI * 440.0 * i as f32 / sr as f32).sin() * 0.3;
        }
        AudioSample::new(samples, sr as u32)
    }

    fn rms_range(samples: &[f32], from: usize, to: usize) -> f64 {
        signal::rms(&samples[from..to])
    }

    #[test]
    fn test_quality_score_formula() {
        assert_eq!(quality_score_from_snr(-10.0), 0.0);
        assert_eq!(quality_score_from_snr(20.0), 1.0);
        assert!((quality_score_from_snr(5.0) - 0.5).abs() < 1e-9);
        assert_eq!(quality_score_from_snr(-50.0), 0.0);
        assert_eq!(quality_score_from_snr(50.0), 1.0);
    }

    #[test]
    fn test_enhance_normalizes_and_scores() {
        let result = enhancer().enhance(&noisy_burst(), 16000).unwrap();

        let peak = result
            .enhanced_audio
            .samples()
            .iter()
            .fold(0.0f32, |acc, s| acc.max(s.abs()));
        assert!((peak - 1.0).abs() < 1e-5);
        assert_eq!(result.enhanced_audio.len(), 48000);
        assert!((0.0..=1.0).contains(&result.quality_score));
        assert!(
            (result.quality_score - quality_score_from_snr(result.metrics_after.snr_db)).abs()
                < 1e-12
        );
    }

    #[test]
    fn test_enhance_suppresses_background_noise() {
        let audio = noisy_burst();
        let result = enhancer().enhance(&audio, 16000).unwrap();

        let before = rms_range(audio.samples(), 0, 12000) / rms_range(audio.samples(), 17000, 23000);
        let enhanced = result.enhanced_audio.samples();
        let after = rms_range(enhanced, 0, 12000) / rms_range(enhanced, 17000, 23000);

        assert!(after < before / 2.0, "before {:.4}, after {:.4}", before, after);
        assert!(result.snr_improvement() > 0.0);
    }

    #[test]
    fn test_enhance_resamples_to_target_rate() {
        let result = enhancer().enhance(&noisy_burst(), 8000).unwrap();
        assert_eq!(result.enhanced_audio.sample_rate(), 8000);
        let diff = (result.enhanced_audio.len() as i64 - 24000).abs();
        assert!(diff <= 16);
    }

    #[test]
    fn test_enhance_silence_stays_silent() {
        let audio = AudioSample::new(vec![0.0; 16000], 16000);
        let result = enhancer().enhance(&audio, 16000).unwrap();
        assert!(result.enhanced_audio.samples().iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_enhance_empty_fails() {
        let audio = AudioSample::new(vec![], 16000);
        assert!(matches!(
            enhancer().enhance(&audio, 16000),
            Err(EnhancementError::Audio(AudioError::Empty))
        ));
    }

    #[test]
    fn test_enhance_rejects_non_finite_samples() {
        let audio = AudioSample::new(vec![0.1, f32::NAN, 0.2], 16000);
        assert!(matches!(
            enhancer().enhance(&audio, 16000),
            Err(EnhancementError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_enhance_rejects_bad_prop_decrease() {
        let config = EnhancementConfig {
            prop_decrease: 1.5,
            ..EnhancementConfig::default()
        };
        let audio = AudioSample::new(vec![0.1; 1600], 16000);
        assert!(matches!(
            AudioEnhancer::new(&config, 0.01).enhance(&audio, 16000),
            Err(EnhancementError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_filtfilt_keeps_constant_signal() {
        let smooth = filtfilt_one_pole(&[2.0; 50], 0.1);
        assert!(smooth.iter().all(|v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn test_smoothing_coefficient_range() {
        let b = smoothing_coefficient(2.0, 16000, 256);
        assert!(b > 0.0 && b < 0.05);
    }
}
