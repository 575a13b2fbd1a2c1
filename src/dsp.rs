//! 短時間フーリエ変換まわりの基本処理
//!
//! 特徴量抽出とノイズ低減で共通に使う。FFT は radix-2 の反復実装で、
//! フレーム長は 2 のべき乗に限る。

use rayon::prelude::*;
use std::f32::consts::PI;
use std::ops::{Add, Mul, Sub};

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

impl Complex {
    pub fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    pub fn norm(self) -> f32 {
        (self.re * self.re + self.im * self.im).sqrt()
    }

    pub fn scale(self, k: f32) -> Self {
        Self::new(self.re * k, self.im * k)
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// インプレース FFT
///
/// `inverse` が true の場合は逆変換（1/N のスケーリング込み）。
/// `buf.len()` は 2 のべき乗であること。
pub fn fft_in_place(buf: &mut [Complex], inverse: bool) {
    let n = buf.len();
    if n <= 1 {
        return;
    }
    debug_assert!(n.is_power_of_two());

    // ビット反転並べ替え
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            buf.swap(i, j);
        }
    }

    let sign = if inverse { 1.0 } else { -1.0 };
    let mut len = 2;
    while len <= n {
        let angle = sign * 2.0 * PI / len as f32;
        let w_len = Complex::new(angle.cos(), angle.sin());
        for start in (0..n).step_by(len) {
            let mut w = Complex::new(1.0, 0.0);
            for k in 0..len / 2 {
                let u = buf[start + k];
                let v = buf[start + k + len / 2] * w;
                buf[start + k] = u + v;
                buf[start + k + len / 2] = u - v;
                w = w * w_len;
            }
        }
        len <<= 1;
    }

    if inverse {
        let k = 1.0 / n as f32;
        for c in buf.iter_mut() {
            *c = c.scale(k);
        }
    }
}

/// Hann 窓（periodic）
pub fn hann_window(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / n as f32).cos())
        .collect()
}

/// フレーム数
///
/// 信号がフレーム長に満たない場合もゼロ埋めして1フレームとする。
pub fn frame_count(len: usize, n_fft: usize, hop: usize) -> usize {
    if len == 0 {
        0
    } else if len <= n_fft {
        1
    } else {
        1 + (len - n_fft).div_ceil(hop)
    }
}

/// 短時間フーリエ変換
///
/// 各フレームの片側スペクトル（`n_fft / 2 + 1` ビン）を返す。
/// フレームごとの FFT は rayon で並列に計算する。
pub fn stft(samples: &[f32], n_fft: usize, hop: usize) -> Vec<Vec<Complex>> {
    let window = hann_window(n_fft);
    let frames = frame_count(samples.len(), n_fft, hop);
    let bins = n_fft / 2 + 1;

    (0..frames)
        .into_par_iter()
        .map(|f| {
            let start = f * hop;
            let mut buf: Vec<Complex> = (0..n_fft)
                .map(|i| {
                    let s = samples.get(start + i).copied().unwrap_or(0.0);
                    Complex::new(s * window[i], 0.0)
                })
                .collect();
            fft_in_place(&mut buf, false);
            buf.truncate(bins);
            buf
        })
        .collect()
}

/// 逆短時間フーリエ変換（重畳加算）
///
/// 窓の二乗和で正規化し、`len` サンプルに切り詰めて返す。
pub fn istft(spectra: &[Vec<Complex>], n_fft: usize, hop: usize, len: usize) -> Vec<f32> {
    let window = hann_window(n_fft);
    let total = spectra.len().saturating_sub(1) * hop + n_fft;
    let mut output = vec![0.0f32; total.max(len)];
    let mut norm = vec![0.0f32; total.max(len)];

    for (f, half) in spectra.iter().enumerate() {
        // 片側スペクトルからエルミート対称な全スペクトルを復元
        let mut buf = vec![Complex::default(); n_fft];
        for (k, c) in half.iter().enumerate().take(n_fft / 2 + 1) {
            buf[k] = *c;
            if k > 0 && k < n_fft - k {
                buf[n_fft - k] = Complex::new(c.re, -c.im);
            }
        }
        fft_in_place(&mut buf, true);

        let start = f * hop;
        for i in 0..n_fft {
            output[start + i] += buf[i].re * window[i];
            norm[start + i] += window[i] * window[i];
        }
    }

    output
        .iter()
        .zip(norm.iter())
        .take(len)
        .map(|(&o, &w)| if w > 1e-8 { o / w } else { o })
        .collect()
}

/// 各ビンの中心周波数 (Hz)
pub fn bin_frequencies(n_fft: usize, sample_rate: u32) -> Vec<f32> {
    (0..=n_fft / 2)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect()
}

fn hz_to_mel(hz: f64) -> f64 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f64) -> f64 {
    700.0 * (10f64.powf(mel / 2595.0) - 1.0)
}

/// 三角メルフィルタバンク
///
/// 0Hz からナイキスト周波数までをメル尺度で等分し、`n_mels` 本のフィルタを返す。
/// 各フィルタの長さは `n_fft / 2 + 1`。
pub fn mel_filterbank(n_mels: usize, n_fft: usize, sample_rate: u32) -> Vec<Vec<f64>> {
    let freqs = bin_frequencies(n_fft, sample_rate);
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let edges: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(max_mel * i as f64 / (n_mels + 1) as f64))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            freqs
                .iter()
                .map(|&f| {
                    let f = f as f64;
                    let up = (f - lo) / (center - lo);
                    let down = (hi - f) / (hi - center);
                    up.min(down).max(0.0)
                })
                .collect()
        })
        .collect()
}

/// 正規直交 DCT-II の先頭 `n_out` 係数
pub fn dct_ii(input: &[f64], n_out: usize) -> Vec<f64> {
    let n = input.len();
    if n == 0 {
        return vec![0.0; n_out];
    }
    let n_f = n as f64;
    (0..n_out)
        .map(|k| {
            let sum: f64 = input
                .iter()
                .enumerate()
                .map(|(i, &x)| {
                    x * (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n_f)).cos()
                })
                .sum();
            let norm = if k == 0 { (1.0 / n_f).sqrt() } else { (2.0 / n_f).sqrt() };
            sum * norm
        })
        .collect()
}

/// 平均と標準偏差（母標準偏差）
pub fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / values.len() as f64;
    (mean, var.sqrt())
}

/// 線形補間によるパーセンタイル (0-100)
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fft_impulse_is_flat() {
        let mut buf = vec![Complex::default(); 8];
        buf[0] = Complex::new(1.0, 0.0);
        fft_in_place(&mut buf, false);
        for c in &buf {
            assert!((c.re - 1.0).abs() < 1e-6);
            assert!(c.im.abs() < 1e-6);
        }
    }

    #[test]
    fn test_fft_round_trip() {
        let original: Vec<Complex> = (0..16).map(|i| Complex::new(i as f32, 0.0)).collect();
        let mut buf = original.clone();
        fft_in_place(&mut buf, false);
        fft_in_place(&mut buf, true);
        for (a, b) in original.iter().zip(buf.iter()) {
            assert!((a.re - b.re).abs() < 1e-4);
            assert!(b.im.abs() < 1e-4);
        }
    }

    #[test]
    fn test_fft_peak_at_tone_bin() {
        let n = 64;
        let mut buf: Vec<Complex> = (0..n)
            .map(|i| Complex::new((2.0 * PI * 4.0 * i as f32 / n as f32).cos(), 0.0))
            .collect();
        fft_in_place(&mut buf, false);
        let peak = (0..n / 2)
            .max_by(|&a, &b| buf[a].norm().total_cmp(&buf[b].norm()))
            .unwrap();
        assert_eq!(peak, 4);
    }

    #[test]
    fn test_stft_istft_reconstructs_signal() {
        let samples: Vec<f32> = (0..4096)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        let spectra = stft(&samples, 512, 128);
        let rebuilt = istft(&spectra, 512, 128, samples.len());

        assert_eq!(rebuilt.len(), samples.len());
        // 端は窓の影響があるので中央部分で比較
        for i in 512..3584 {
            assert!((rebuilt[i] - samples[i]).abs() < 1e-3, "index {}", i);
        }
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(0, 512, 128), 0);
        assert_eq!(frame_count(100, 512, 128), 1);
        assert_eq!(frame_count(512, 512, 128), 1);
        assert_eq!(frame_count(513, 512, 128), 2);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 10.0) - 1.4).abs() < 1e-9);
    }

    #[test]
    fn test_mel_filterbank_shape() {
        let bank = mel_filterbank(40, 512, 16000);
        assert_eq!(bank.len(), 40);
        assert!(bank.iter().all(|f| f.len() == 257));
        // 各フィルタは 1 以下で少なくとも1つのビンを持つ
        for filter in &bank {
            assert!(filter.iter().all(|&w| (0.0..=1.0).contains(&w)));
            assert!(filter.iter().any(|&w| w > 0.0));
        }
    }

    #[test]
    fn test_dct_of_constant_has_only_dc() {
        let coeffs = dct_ii(&[2.0; 8], 4);
        assert!((coeffs[0] - 2.0 * 8f64.sqrt()).abs() < 1e-9);
        assert!(coeffs[1..].iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn test_mean_std() {
        let (mean, std) = mean_std(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((mean - 5.0).abs() < 1e-9);
        assert!((std - 2.0).abs() < 1e-9);
    }
}
