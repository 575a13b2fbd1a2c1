//! WAV デコードとリサンプリング
//!
//! アップロードされた音声バイト列をモノラル f32 サンプルに変換し、
//! 各処理が必要とするサンプリングレートへ変換する。

use crate::error::AudioError;
use crate::types::AudioSample;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::io::Cursor;

/// WAV バイト列をデコード
///
/// 8/16/24/32bit 整数 PCM と 32bit float PCM に対応する。
/// 複数チャンネルの場合は平均してモノラルにする。
///
/// # Errors
///
/// - サイズ上限を超えた場合 `AudioError::TooLarge`
/// - WAV として読めない場合 `AudioError::Decode`
/// - サンプルが1つもない場合 `AudioError::Empty`
pub fn decode_wav(bytes: &[u8], max_size: usize) -> Result<AudioSample, AudioError> {
    if bytes.len() > max_size {
        return Err(AudioError::TooLarge {
            size: bytes.len(),
            limit: max_size,
        });
    }

    let reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| AudioError::Decode(format!("WAVヘッダの読み込みに失敗: {}", e)))?;
    let spec = reader.spec();

    if spec.channels == 0 || spec.sample_rate == 0 {
        return Err(AudioError::Decode(format!(
            "不正なフォーマット: {}ch, {}Hz",
            spec.channels, spec.sample_rate
        )));
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::Decode(format!("サンプルの読み込みに失敗: {}", e)))?,
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(AudioError::Decode(format!(
                    "未対応のビット深度: {}",
                    spec.bits_per_sample
                )));
            }
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| AudioError::Decode(format!("サンプルの読み込みに失敗: {}", e)))?
        }
    };

    if let Some(pos) = interleaved.iter().position(|s| !s.is_finite()) {
        return Err(AudioError::Decode(format!(
            "有限でないサンプルを含みます: index {}",
            pos
        )));
    }

    let mono = downmix(&interleaved, spec.channels as usize);
    if mono.is_empty() {
        return Err(AudioError::Empty);
    }

    log::debug!(
        "WAVデコード完了: {}Hz, {}ch, {}bit, {}サンプル",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample,
        mono.len()
    );

    Ok(AudioSample::new(mono, spec.sample_rate))
}

/// インターリーブされたサンプルをモノラルに変換
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// 目標サンプリングレートへリサンプリング
///
/// 既に目標レートの場合はコピーを返す。
pub fn resample(audio: &AudioSample, target_rate: u32) -> Result<AudioSample, AudioError> {
    if audio.is_empty() {
        return Err(AudioError::Empty);
    }
    if target_rate == 0 {
        return Err(AudioError::Resample("目標サンプリングレートが 0 です".to_string()));
    }
    if audio.sample_rate() == target_rate {
        return Ok(audio.clone());
    }

    let ratio = target_rate as f64 / audio.sample_rate() as f64;
    let input_frames = audio.len();
    let expected_frames = (input_frames as f64 * ratio).round() as usize;

    let mut resampler =
        FastFixedIn::<f32>::new(ratio, 1.0, PolynomialDegree::Septic, input_frames, 1)
            .map_err(|e| AudioError::Resample(format!("リサンプラー作成失敗: {}", e)))?;

    let delay = resampler.output_delay();
    let input = vec![audio.samples().to_vec()];

    let mut output = resampler
        .process(&input, None)
        .map_err(|e| AudioError::Resample(e.to_string()))?
        .into_iter()
        .next()
        .unwrap_or_default();

    // 内部遅延の分だけ残りを吐き出させる
    let tail = resampler
        .process_partial(None::<&[Vec<f32>]>, None)
        .map_err(|e| AudioError::Resample(e.to_string()))?;
    if let Some(channel) = tail.into_iter().next() {
        output.extend(channel);
    }

    let resampled: Vec<f32> = output
        .into_iter()
        .skip(delay)
        .take(expected_frames)
        .collect();

    log::debug!(
        "リサンプリング: {}Hz -> {}Hz ({} -> {} サンプル)",
        audio.sample_rate(),
        target_rate,
        input_frames,
        resampled.len()
    );

    if resampled.is_empty() {
        return Err(AudioError::Empty);
    }

    Ok(AudioSample::new(resampled, target_rate))
}

/// 音声をデコードして目標レートに揃える
pub fn load(bytes: &[u8], target_rate: u32, max_size: usize) -> Result<AudioSample, AudioError> {
    let audio = decode_wav(bytes, max_size)?;
    resample(&audio, target_rate)
}
