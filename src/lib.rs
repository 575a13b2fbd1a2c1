//! voice-docgen - 音声からドキュメントを生成するコア
//!
//! このクレートは、録音された音声の品質を評価・強調して文字起こしし、
//! その文字起こしを構造化された文書へ整形する処理を提供します。
//!
//! # 主な機能
//!
//! - **信号指標**: SNR・RMS・ダイナミックレンジ・無音率とスペクトル特徴量
//! - **VAD (Voice Activity Detection)**: 音声区間の検出と統計
//! - **音声強調**: スペクトルゲーティングによるノイズ低減と正規化
//! - **品質評価**: 重み付きスコア・グレード・問題点・推奨事項
//! - **ドキュメント生成**: 分析 → 生成 → テンプレート適用 → 後処理
//! - **テンプレートエンジン**: 関数とフィルタを限定したテンプレート言語
//!
//! # アーキテクチャ
//!
//! ```text
//! [WAV bytes] → [AudioDecoder] ──┬── [Signal Features] ──┐
//!                                ├── [VAD] ──────────────┤
//!                                └── [AudioEnhancer] ────┤
//!                                                        ↓
//!                                 [SpeechTranscriber] → [QualityAssessor]
//!                                          │
//!                                          ↓
//!                                 [DocumentProcessor] ← [TextGenerator]
//!                                          │              [TemplateStore]
//!                                          ↓
//!                                 [DocumentGenerationResult]
//! ```
//!
//! # 使用例
//!
//! ```no_run
//! use voice_docgen::config::Config;
//!
//! // 設定ファイルを読み込み
//! let config = Config::load_or_default("config.toml").unwrap();
//!
//! // またはデフォルト設定を生成
//! Config::write_default("config.toml").unwrap();
//! ```

pub mod analysis;
pub mod audio_decoder;
pub mod audio_pipeline;
pub mod config;
pub mod document;
pub mod document_processor;
pub mod document_scoring;
pub mod dsp;
pub mod enhancer;
pub mod error;
pub mod llm_api;
pub mod quality;
pub mod signal;
pub mod template;
pub mod template_store;
pub mod text;
pub mod text_generator;
pub mod transcribe_backend;
pub mod types;
pub mod vad;
pub mod wav_writer;
pub mod whisper_api;
