use anyhow::{bail, Context, Result};
use env_logger::Env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use voice_docgen::audio_pipeline::{AudioProcessor, ProcessingOptions};
use voice_docgen::config::Config;
use voice_docgen::document::{DocumentGenerationRequest, DocumentType};
use voice_docgen::document_processor::DocumentProcessor;
use voice_docgen::llm_api::OpenAiChatBackend;
use voice_docgen::template::TemplateEngine;
use voice_docgen::template_store::BuiltinTemplateStore;
use voice_docgen::transcribe_backend::SpeechTranscriber;
use voice_docgen::types::EnhancementLevel;
use voice_docgen::wav_writer;
use voice_docgen::whisper_api::WhisperBackend;

const USAGE: &str = "使い方:
  voice-docgen --generate-config [path]
  voice-docgen [config.toml] process <audio.wav> [--type <document_type>] [--no-enhance] [--level <level>] [--save-enhanced <out.wav>]
  voice-docgen [config.toml] generate <transcript.txt> --type <document_type> [--template <id>]
  voice-docgen validate-template <file>";

const COMMANDS: [&str; 3] = ["process", "generate", "validate-template"];

#[tokio::main]
async fn main() -> Result<()> {
    // コマンドライン引数をパース
    let args: Vec<String> = std::env::args().skip(1).collect();

    // 設定ファイル生成モード
    if args.first().map(String::as_str) == Some("--generate-config") {
        let config_path = args.get(1).map(String::as_str).unwrap_or("config.toml");
        Config::write_default(config_path)?;
        println!("設定ファイルを生成しました: {}", config_path);
        return Ok(());
    }

    // 先頭がサブコマンドでなければ設定ファイルのパス
    let (config_path, rest) = match args.first() {
        Some(first) if !first.starts_with("--") && !COMMANDS.contains(&first.as_str()) => {
            (first.as_str(), &args[1..])
        }
        _ => ("config.toml", &args[..]),
    };

    let mut config = Config::load_or_default(config_path)?;
    config.apply_env_overrides();

    // ロガーを初期化
    env_logger::Builder::from_env(Env::default().default_filter_or(config.output.log_level.as_str()))
        .format_timestamp(None)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper", log::LevelFilter::Warn)
        .init();

    let Some((command, command_args)) = rest.split_first() else {
        eprintln!("{}", USAGE);
        bail!("サブコマンドが指定されていません");
    };

    match command.as_str() {
        "process" => run_process(&config, command_args).await,
        "generate" => run_generate(&config, command_args).await,
        "validate-template" => run_validate(command_args),
        other => {
            eprintln!("{}", USAGE);
            bail!("不明なサブコマンド: {}", other)
        }
    }
}

/// `--name value` 形式のオプション値
fn option_value<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn has_flag(args: &[String], name: &str) -> bool {
    args.iter().any(|a| a == name)
}

/// オプションを除いた最初の位置引数
fn positional(args: &[String]) -> Option<&str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--no-enhance" => {}
            a if a.starts_with("--") => {
                iter.next();
            }
            a => return Some(a),
        }
    }
    None
}

fn document_processor(config: &Config) -> Result<DocumentProcessor> {
    let generator = OpenAiChatBackend::new(config.llm.clone())?;
    Ok(DocumentProcessor::new(
        Arc::new(generator),
        Arc::new(BuiltinTemplateStore::new()),
        &config.llm,
    ))
}

/// 相対パスは出力ディレクトリ配下に置く
fn output_path(config: &Config, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(&config.output.output_dir).join(path)
    }
}

async fn run_process(config: &Config, args: &[String]) -> Result<()> {
    let audio_path = positional(args).context("音声ファイルを指定してください")?;
    let document_type: DocumentType = option_value(args, "--type")
        .unwrap_or("meeting_minutes")
        .parse()?;

    let mut options = ProcessingOptions::from_config(config);
    if has_flag(args, "--no-enhance") {
        options.enable_enhancement = false;
    }
    if let Some(level) = option_value(args, "--level") {
        let level: EnhancementLevel = level.parse().map_err(anyhow::Error::msg)?;
        options = options.with_level(level);
    }

    let bytes = std::fs::read(audio_path)
        .with_context(|| format!("音声ファイルの読み込みに失敗: {}", audio_path))?;

    let transcriber = match config.whisper.clone() {
        Some(whisper) => Some(Arc::new(WhisperBackend::new(whisper)?) as Arc<dyn SpeechTranscriber>),
        None => {
            log::warn!("whisper セクションがないため文字起こしを行いません");
            None
        }
    };

    log::info!("voice-docgen: {} を処理します", audio_path);
    let report = AudioProcessor::new(config, transcriber)
        .process(&bytes, &options)
        .await
        .with_context(|| format!("音声処理に失敗: {}", audio_path))?;

    if let Some(out) = option_value(args, "--save-enhanced") {
        match &report.enhanced_audio {
            Some(audio) => {
                let path = output_path(config, out);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("出力ディレクトリの作成に失敗: {:?}", parent))?;
                }
                wav_writer::write_wav_file(&path, audio)?;
                log::info!("強調後の音声を保存しました: {:?}", path);
            }
            None => log::warn!("強調後の音声がないため保存しません"),
        }
    }

    let document = match report
        .transcription
        .as_ref()
        .filter(|t| !t.text.trim().is_empty())
    {
        Some(transcription) => {
            let request = DocumentGenerationRequest::new(transcription.text.clone(), document_type);
            Some(document_processor(config)?.generate_document(&request).await?)
        }
        None => {
            log::warn!("文字起こし結果がないためドキュメントを生成しません");
            None
        }
    };

    let output = serde_json::json!({
        "audio": report,
        "document": document,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn run_generate(config: &Config, args: &[String]) -> Result<()> {
    let transcript_path = positional(args).context("文字起こしファイルを指定してください")?;
    let document_type: DocumentType = option_value(args, "--type")
        .context("--type を指定してください")?
        .parse()?;

    let transcript = std::fs::read_to_string(transcript_path)
        .with_context(|| format!("文字起こしファイルの読み込みに失敗: {}", transcript_path))?;

    let mut request = DocumentGenerationRequest::new(transcript, document_type);
    if let Some(id) = option_value(args, "--template") {
        request = request.with_template_id(id);
    }

    let result = document_processor(config)?.generate_document(&request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn run_validate(args: &[String]) -> Result<()> {
    let path = positional(args).context("テンプレートファイルを指定してください")?;
    let markup = std::fs::read_to_string(path)
        .with_context(|| format!("テンプレートの読み込みに失敗: {}", path))?;

    let report = TemplateEngine::new().validate(&markup);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
