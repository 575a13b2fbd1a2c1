//! 信号指標の計算
//!
//! SNR 推定・RMS・ダイナミックレンジ・無音率の基本指標と、
//! スペクトル重心などのフレーム単位の特徴量を計算する。

use crate::audio_decoder;
use crate::config::AudioConfig;
use crate::dsp::{self, Complex};
use crate::error::AudioError;
use crate::types::{AudioSample, QualityMetrics};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// SNR の上限・下限 (dB)
pub const SNR_LIMIT_DB: f64 = 50.0;

/// SNR 推定に使うフレーム数
const SNR_FRAMES: usize = 100;

/// ノイズフロアとみなすフレーム RMS のパーセンタイル
const NOISE_PERCENTILE: f64 = 10.0;

/// 特徴量抽出のフレーム長とホップ長
const FEATURE_FRAME: usize = 2048;
const FEATURE_HOP: usize = 512;

/// スペクトルロールオフの累積エネルギー比
const ROLLOFF_PERCENT: f64 = 0.85;

/// MFCC の係数の数とメルフィルタ数
pub const MFCC_COEFFS: usize = 13;
const MEL_BANDS: usize = 128;

/// 対数パワーの下限
const POWER_FLOOR: f64 = 1e-10;

/// 平均と標準偏差
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureStat {
    pub mean: f64,
    pub std: f64,
}

impl FeatureStat {
    fn from_values(values: &[f64]) -> Self {
        let (mean, std) = dsp::mean_std(values);
        Self { mean, std }
    }
}

/// 音声特徴量
///
/// # JSON出力例
///
/// ```json
/// {
///   "sample_rate": 22050,
///   "duration_seconds": 12.5,
///   "spectral_centroid": { "mean": 1830.2, "std": 412.7 },
///   "tempo_bpm": 112.3,
///   "snr_db": 18.4,
///   "mfcc_means": [-312.4, 98.1, -11.7, 24.0, 3.2, 8.9, -4.1, 2.6, -6.3, 1.8, -2.2, 0.7, -1.5],
///   "mfcc_stds": [61.2, 22.5, 14.8, 11.3, 9.7, 8.4, 7.9, 7.1, 6.6, 6.0, 5.8, 5.5, 5.2]
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub spectral_centroid: FeatureStat,
    pub spectral_rolloff: FeatureStat,
    pub spectral_bandwidth: FeatureStat,
    pub zero_crossing_rate: FeatureStat,
    pub rms: FeatureStat,
    /// テンポ推定値 (BPM)。推定できない場合は 0
    pub tempo_bpm: f64,
    pub dynamic_range: f64,
    pub silence_ratio: f64,
    pub snr_db: f64,
    /// MFCC 各係数のフレーム平均 (13 係数)
    pub mfcc_means: Vec<f64>,
    /// MFCC 各係数のフレーム標準偏差
    pub mfcc_stds: Vec<f64>,
}

impl AudioFeatures {
    /// 品質評価に使う基本指標
    pub fn quality_metrics(&self) -> QualityMetrics {
        QualityMetrics {
            snr_db: self.snr_db,
            rms: self.rms.mean,
            dynamic_range: self.dynamic_range,
            silence_ratio: self.silence_ratio,
        }
    }
}

/// SNR を推定する (dB)
///
/// 信号を約100フレームに分割し、フレーム RMS の10パーセンタイルの二乗を
/// ノイズフロアとする。結果は [-50, 50] にクランプされる。
///
/// - 1フレームも作れない短い信号は 0 dB
/// - ノイズフロアが 0 の場合は上限値 50 dB
/// - 有限でないサンプルを含み推定値が NaN になる場合は 0 dB
pub fn calculate_snr(samples: &[f32]) -> f64 {
    let frame_size = samples.len() / SNR_FRAMES;
    if frame_size < 1 {
        return 0.0;
    }

    let frame_rms: Vec<f64> = (0..samples.len() - frame_size)
        .step_by(frame_size)
        .map(|start| rms(&samples[start..start + frame_size]))
        .collect();

    let noise_floor = dsp::percentile(&frame_rms, NOISE_PERCENTILE).powi(2);
    if noise_floor == 0.0 {
        return SNR_LIMIT_DB;
    }

    let signal_power = mean_square(samples);
    let snr_linear = signal_power / noise_floor;
    if snr_linear <= 0.0 {
        return -SNR_LIMIT_DB;
    }

    let snr_db = 10.0 * snr_linear.log10();
    if snr_db.is_nan() {
        return 0.0;
    }
    snr_db.clamp(-SNR_LIMIT_DB, SNR_LIMIT_DB)
}

fn mean_square(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64
}

/// RMS（二乗平均平方根）
pub fn rms(samples: &[f32]) -> f64 {
    mean_square(samples).sqrt()
}

/// 最大値 - 最小値
pub fn dynamic_range(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let (min, max) = samples
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &s| {
            (lo.min(s), hi.max(s))
        });
    (max - min) as f64
}

/// 振幅が閾値未満のサンプルの割合
pub fn silence_ratio(samples: &[f32], threshold: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let silent = samples
        .iter()
        .filter(|&&s| (s.abs() as f64) < threshold)
        .count();
    silent as f64 / samples.len() as f64
}

/// 基本品質指標を計算する
pub fn quality_metrics(samples: &[f32], silence_threshold: f64) -> QualityMetrics {
    QualityMetrics {
        snr_db: calculate_snr(samples),
        rms: rms(samples),
        dynamic_range: dynamic_range(samples),
        silence_ratio: silence_ratio(samples, silence_threshold),
    }
}

/// 特徴量を抽出する
///
/// 音声を特徴量用のサンプリングレートに揃えてから計算する。
///
/// # Errors
///
/// 空の音声、またはリサンプリングに失敗した場合 `AudioError`
pub fn extract_features(audio: &AudioSample, config: &AudioConfig) -> Result<AudioFeatures, AudioError> {
    if audio.is_empty() {
        return Err(AudioError::Empty);
    }

    let audio = audio_decoder::resample(audio, config.feature_sample_rate)?;
    let samples = audio.samples();
    let sample_rate = audio.sample_rate();

    let spectra = dsp::stft(samples, FEATURE_FRAME, FEATURE_HOP);
    let freqs = dsp::bin_frequencies(FEATURE_FRAME, sample_rate);

    let per_frame: Vec<(f64, f64, f64)> = spectra
        .par_iter()
        .map(|frame| spectral_shape(frame, &freqs))
        .collect();
    let centroids: Vec<f64> = per_frame.iter().map(|f| f.0).collect();
    let rolloffs: Vec<f64> = per_frame.iter().map(|f| f.1).collect();
    let bandwidths: Vec<f64> = per_frame.iter().map(|f| f.2).collect();

    let mel_bank = dsp::mel_filterbank(MEL_BANDS, FEATURE_FRAME, sample_rate);
    let mfccs: Vec<Vec<f64>> = spectra.par_iter().map(|frame| mfcc(frame, &mel_bank)).collect();
    let (mfcc_means, mfcc_stds): (Vec<f64>, Vec<f64>) = (0..MFCC_COEFFS)
        .map(|k| {
            let values: Vec<f64> = mfccs.iter().map(|c| c[k]).collect();
            dsp::mean_std(&values)
        })
        .unzip();

    let frames = frame_slices(samples, FEATURE_FRAME, FEATURE_HOP);
    let zcr: Vec<f64> = frames.iter().map(|f| zero_crossing_rate(f)).collect();
    let frame_rms: Vec<f64> = frames.iter().map(|f| rms(f)).collect();

    let features = AudioFeatures {
        sample_rate,
        duration_seconds: audio.duration_seconds(),
        spectral_centroid: FeatureStat::from_values(&centroids),
        spectral_rolloff: FeatureStat::from_values(&rolloffs),
        spectral_bandwidth: FeatureStat::from_values(&bandwidths),
        zero_crossing_rate: FeatureStat::from_values(&zcr),
        rms: FeatureStat::from_values(&frame_rms),
        tempo_bpm: estimate_tempo(&spectra, sample_rate, FEATURE_HOP),
        dynamic_range: dynamic_range(samples),
        silence_ratio: silence_ratio(samples, config.silence_threshold),
        snr_db: calculate_snr(samples),
        mfcc_means,
        mfcc_stds,
    };

    log::debug!(
        "特徴量抽出完了: {:.1}秒, SNR {:.1}dB, 重心 {:.0}Hz, テンポ {:.0}BPM",
        features.duration_seconds,
        features.snr_db,
        features.spectral_centroid.mean,
        features.tempo_bpm
    );

    Ok(features)
}

/// 1フレームの MFCC
///
/// パワースペクトル → メルフィルタ → dB → DCT-II。
fn mfcc(frame: &[Complex], mel_bank: &[Vec<f64>]) -> Vec<f64> {
    let power: Vec<f64> = frame.iter().map(|c| (c.norm() as f64).powi(2)).collect();
    let log_mel: Vec<f64> = mel_bank
        .iter()
        .map(|filter| {
            let energy: f64 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
            10.0 * energy.max(POWER_FLOOR).log10()
        })
        .collect();
    dsp::dct_ii(&log_mel, MFCC_COEFFS)
}

/// フレームのスペクトル重心・ロールオフ・帯域幅
fn spectral_shape(frame: &[Complex], freqs: &[f32]) -> (f64, f64, f64) {
    let mags: Vec<f64> = frame.iter().map(|c| c.norm() as f64).collect();
    let total: f64 = mags.iter().sum();
    if total <= f64::EPSILON {
        return (0.0, 0.0, 0.0);
    }

    let centroid = mags
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| m * f as f64)
        .sum::<f64>()
        / total;

    let bandwidth = (mags
        .iter()
        .zip(freqs)
        .map(|(&m, &f)| m * (f as f64 - centroid).powi(2))
        .sum::<f64>()
        / total)
        .sqrt();

    let threshold = ROLLOFF_PERCENT * total;
    let mut cumulative = 0.0;
    let mut rolloff = freqs.last().copied().unwrap_or(0.0) as f64;
    for (&m, &f) in mags.iter().zip(freqs) {
        cumulative += m;
        if cumulative >= threshold {
            rolloff = f as f64;
            break;
        }
    }

    (centroid, rolloff, bandwidth)
}

/// 時間領域のフレーム分割（末尾はゼロ埋めせず短いまま）
fn frame_slices(samples: &[f32], frame: usize, hop: usize) -> Vec<&[f32]> {
    let count = dsp::frame_count(samples.len(), frame, hop);
    (0..count)
        .map(|i| {
            let start = i * hop;
            let end = (start + frame).min(samples.len());
            &samples[start..end]
        })
        .collect()
}

/// ゼロ交差率
fn zero_crossing_rate(frame: &[f32]) -> f64 {
    if frame.len() < 2 {
        return 0.0;
    }
    let crossings = frame
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f64 / frame.len() as f64
}

/// テンポ推定
///
/// スペクトルフラックスをオンセット強度とし、その自己相関が最大となる
/// 30-240 BPM のラグからテンポを求める。
fn estimate_tempo(spectra: &[Vec<Complex>], sample_rate: u32, hop: usize) -> f64 {
    if spectra.len() < 4 {
        return 0.0;
    }

    let log_mags: Vec<Vec<f64>> = spectra
        .par_iter()
        .map(|frame| frame.iter().map(|c| (1.0 + c.norm() as f64).ln()).collect())
        .collect();

    let onset: Vec<f64> = log_mags
        .windows(2)
        .map(|w| {
            w[1].iter()
                .zip(&w[0])
                .map(|(cur, prev)| (cur - prev).max(0.0))
                .sum()
        })
        .collect();

    let (mean, _) = dsp::mean_std(&onset);
    let centered: Vec<f64> = onset.iter().map(|v| v - mean).collect();

    let frames_per_second = sample_rate as f64 / hop as f64;
    let min_lag = ((60.0 / 240.0) * frames_per_second).floor().max(1.0) as usize;
    let max_lag = ((60.0 / 30.0) * frames_per_second).ceil() as usize;
    let max_lag = max_lag.min(centered.len().saturating_sub(1));
    if min_lag > max_lag {
        return 0.0;
    }

    let best = (min_lag..=max_lag)
        .map(|lag| {
            let corr: f64 = centered
                .iter()
                .zip(&centered[lag..])
                .map(|(a, b)| a * b)
                .sum();
            (lag, corr)
        })
        .max_by(|a, b| a.1.total_cmp(&b.1));

    match best {
        Some((lag, corr)) if corr > 0.0 => 60.0 * frames_per_second / lag as f64,
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn sine(freq: f32, sample_rate: u32, seconds: f32, amplitude: f32) -> Vec<f32> {
        let n = (sample_rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate as f32).sin() * amplitude)
            .collect()
    }

    /// 決定的な白色ノイズ（線形合同法）
    fn white_noise(n: usize, amplitude: f32, seed: u64) -> Vec<f32> {
        let mut state = seed;
        (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let unit = (state >> 33) as f32 / (1u64 << 31) as f32;
                (unit * 2.0 - 1.0) * amplitude
            })
            .collect()
    }

    #[test]
    fn test_snr_short_signal_is_zero() {
        assert_eq!(calculate_snr(&[0.5; 99]), 0.0);
        assert_eq!(calculate_snr(&[]), 0.0);
    }

    #[test]
    fn test_snr_non_finite_samples_stay_in_range() {
        let mut samples = vec![0.3f32; 16000];
        samples[5] = f32::NAN;
        let snr = calculate_snr(&samples);
        assert!((-SNR_LIMIT_DB..=SNR_LIMIT_DB).contains(&snr), "snr {}", snr);

        samples[5] = f32::INFINITY;
        let snr = calculate_snr(&samples);
        assert!((-SNR_LIMIT_DB..=SNR_LIMIT_DB).contains(&snr), "snr {}", snr);
    }

    #[test]
    fn test_snr_silence_hits_ceiling() {
        assert_eq!(calculate_snr(&vec![0.0; 16000]), SNR_LIMIT_DB);
    }

    #[test]
    fn test_snr_within_bounds_for_fixtures() {
        let fixtures = vec![
            vec![0.0; 16000],
            sine(440.0, 16000, 1.0, 0.8),
            white_noise(16000, 0.5, 42),
            vec![1.0; 500],
        ];
        for samples in fixtures {
            let snr = calculate_snr(&samples);
            assert!((-SNR_LIMIT_DB..=SNR_LIMIT_DB).contains(&snr), "snr {}", snr);
        }
    }

    #[test]
    fn test_snr_speech_in_quiet_background_is_high() {
        // 前半は小さなノイズ、後半は大きなトーン
        let mut samples = white_noise(8000, 0.001, 7);
        samples.extend(sine(300.0, 16000, 0.5, 0.8));
        let snr = calculate_snr(&samples);
        assert!(snr > 20.0, "snr {}", snr);
    }

    #[test]
    fn test_snr_stationary_noise_is_low() {
        let snr = calculate_snr(&white_noise(16000, 0.5, 3));
        assert!(snr.abs() < 3.0, "snr {}", snr);
    }

    #[test]
    fn test_basic_metrics() {
        let samples = vec![0.0, 0.005, -0.5, 0.5];
        assert!((dynamic_range(&samples) - 1.0).abs() < 1e-6);
        assert!((silence_ratio(&samples, 0.01) - 0.5).abs() < 1e-9);
        assert!((rms(&[0.5, -0.5]) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_quality_metrics_empty() {
        let metrics = quality_metrics(&[], 0.01);
        assert_eq!(metrics, QualityMetrics::default());
    }

    #[test]
    fn test_zero_crossing_rate_of_alternating_signal() {
        let frame: Vec<f32> = (0..100).map(|i| if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        assert!((zero_crossing_rate(&frame) - 0.99).abs() < 1e-9);
    }

    #[test]
    fn test_extract_features_of_tone() {
        let audio = AudioSample::new(sine(1000.0, 22050, 1.0, 0.5), 22050);
        let features = extract_features(&audio, &AudioConfig::default()).unwrap();

        assert_eq!(features.sample_rate, 22050);
        assert!((features.duration_seconds - 1.0).abs() < 1e-6);
        assert!(
            (features.spectral_centroid.mean - 1000.0).abs() < 300.0,
            "centroid {}",
            features.spectral_centroid.mean
        );
        assert!(features.spectral_rolloff.mean >= 1000.0);
        assert!(features.zero_crossing_rate.mean > 0.0);
        assert!((-SNR_LIMIT_DB..=SNR_LIMIT_DB).contains(&features.snr_db));
    }

    #[test]
    fn test_extract_features_mfcc_of_tone() {
        let loud = AudioSample::new(sine(1000.0, 22050, 1.0, 0.5), 22050);
        let quiet = AudioSample::new(sine(1000.0, 22050, 1.0, 0.05), 22050);
        let loud = extract_features(&loud, &AudioConfig::default()).unwrap();
        let quiet = extract_features(&quiet, &AudioConfig::default()).unwrap();

        assert_eq!(loud.mfcc_means.len(), MFCC_COEFFS);
        assert_eq!(loud.mfcc_stds.len(), MFCC_COEFFS);
        assert!(loud.mfcc_means.iter().all(|v| v.is_finite()));
        assert!(loud.mfcc_stds.iter().all(|v| v.is_finite() && *v >= 0.0));
        // 第0係数は対数エネルギーに比例する
        assert!(loud.mfcc_means[0] > quiet.mfcc_means[0]);
    }

    #[test]
    fn test_extract_features_resamples_input() {
        let audio = AudioSample::new(sine(440.0, 16000, 0.5, 0.5), 16000);
        let features = extract_features(&audio, &AudioConfig::default()).unwrap();
        assert_eq!(features.sample_rate, 22050);
    }

    #[test]
    fn test_extract_features_empty_fails() {
        let audio = AudioSample::new(vec![], 22050);
        assert!(matches!(
            extract_features(&audio, &AudioConfig::default()),
            Err(AudioError::Empty)
        ));
    }

    #[test]
    fn test_tempo_of_click_track() {
        // 120 BPM のクリック列 (0.5秒間隔)
        let sr = 22050;
        let mut samples = vec![0.0f32; sr * 6];
        for beat in 0..12 {
            let start = beat * sr / 2;
            for i in 0..200 {
                samples[start + i] = if i % 2 == 0 { 0.9 } else { -0.9 };
            }
        }
        let spectra = dsp::stft(&samples, FEATURE_FRAME, FEATURE_HOP);
        let tempo = estimate_tempo(&spectra, sr as u32, FEATURE_HOP);
        // ラグの量子化誤差を許容
        assert!((tempo - 120.0).abs() < 8.0 || (tempo - 60.0).abs() < 4.0, "tempo {}", tempo);
    }
}
