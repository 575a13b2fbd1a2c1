use crate::types::{AudioSample, SampleI16};
use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, Cursor, Seek, Write};
use std::path::Path;

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// f32 サンプル (-1.0 ~ 1.0) を 16bit PCM に変換
///
/// 範囲外の値はクリップする。
pub fn to_i16(sample: f32) -> SampleI16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as SampleI16
}

fn write_samples<W: Write + Seek>(writer: W, audio: &AudioSample) -> Result<()> {
    let mut writer = hound::WavWriter::new(writer, wav_spec(audio.sample_rate()))
        .context("WAVライター作成失敗")?;
    for &sample in audio.samples() {
        writer
            .write_sample(to_i16(sample))
            .context("WAVファイルへのサンプル書き込みに失敗")?;
    }
    writer
        .finalize()
        .context("WAVファイルのファイナライズに失敗")?;
    Ok(())
}

/// モノラル 16bit PCM の WAV バイト列にエンコード
///
/// 文字起こし API へのアップロードに使う。
pub fn encode_wav(audio: &AudioSample) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_samples(&mut cursor, audio)?;
    Ok(cursor.into_inner())
}

/// WAV ファイルとして保存
///
/// 親ディレクトリが存在しない場合は作成する。
pub fn write_wav_file<P: AsRef<Path>>(path: P, audio: &AudioSample) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", parent))?;
        }
    }

    let file = fs::File::create(path)
        .with_context(|| format!("WAVファイルの作成に失敗: {:?}", path))?;
    write_samples(BufWriter::new(file), audio)?;

    log::info!(
        "WAVファイル書き込み完了: {:?}, {}サンプル ({:.2}秒)",
        path,
        audio.len(),
        audio.duration_seconds()
    );
    Ok(())
}
