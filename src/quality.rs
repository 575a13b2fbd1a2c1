//! 音声品質の総合評価
//!
//! 信号指標・VAD 統計・強調結果・文字起こし信頼度を重み付きで合成し、
//! スコア・グレード・問題点を求める。推奨事項は問題点の集合だけから決まる。

use crate::config::{QualityConfig, QualityWeights};
use crate::types::{QualityMetrics, VadStatistics};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 品質評価の構成要素
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityComponent {
    Snr,
    SpeechContent,
    DynamicRange,
    TranscriptionConfidence,
    EnhancementEffectiveness,
}

impl QualityComponent {
    pub const ALL: [QualityComponent; 5] = [
        QualityComponent::Snr,
        QualityComponent::SpeechContent,
        QualityComponent::DynamicRange,
        QualityComponent::TranscriptionConfidence,
        QualityComponent::EnhancementEffectiveness,
    ];

    pub fn weight(self, weights: &QualityWeights) -> f64 {
        match self {
            QualityComponent::Snr => weights.snr,
            QualityComponent::SpeechContent => weights.speech_content,
            QualityComponent::DynamicRange => weights.dynamic_range,
            QualityComponent::TranscriptionConfidence => weights.transcription_confidence,
            QualityComponent::EnhancementEffectiveness => weights.enhancement_effectiveness,
        }
    }
}

/// 検出された問題点
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityIssue {
    LowSnr,
    InsufficientSpeech,
    LowDynamicRange,
    LowTranscriptionConfidence,
    EnhancementFailed,
    FeatureExtractionFailed,
    SpeechDetectionFailed,
    TranscriptionFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityGrade {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityGrade {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            QualityGrade::Excellent
        } else if score >= 0.6 {
            QualityGrade::Good
        } else if score >= 0.4 {
            QualityGrade::Fair
        } else {
            QualityGrade::Poor
        }
    }
}

/// 評価に使った入力値のスナップショット
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentMetrics {
    pub snr_db: f64,
    pub speech_ratio: f64,
    pub dynamic_range: f64,
    pub transcription_confidence: f64,
    /// 強調を行わなかった場合は 0
    pub enhancement_improvement: f64,
}

/// 品質評価の結果
///
/// 生成後に変更されることはない。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualityAssessment {
    pub overall_score: f64,
    pub grade: QualityGrade,
    pub component_scores: BTreeMap<QualityComponent, f64>,
    pub issues: BTreeSet<QualityIssue>,
    pub metrics: AssessmentMetrics,
}

/// 評価の入力
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityInputs {
    pub metrics: QualityMetrics,
    pub vad: VadStatistics,
    /// 強調を行った場合の SNR 改善量 (dB)
    pub snr_improvement: Option<f64>,
    pub transcription_confidence: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    RecordingEnvironment,
    RecordingTechnique,
    RecordingEquipment,
    SpeechClarity,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserRecommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub title: String,
    pub description: String,
    pub priority: Priority,
}

/// 改善のための推奨事項
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Recommendations {
    pub user_recommendations: Vec<UserRecommendation>,
    pub technical_suggestions: Vec<String>,
    pub next_steps: Vec<String>,
}

const NEXT_STEPS: [&str; 3] = [
    "Review transcription accuracy",
    "Apply recommended improvements for future recordings",
    "Consider re-recording if quality is insufficient",
];

/// 強調の有効化を勧めるスコアの境界
const ENABLE_ENHANCEMENT_BELOW: f64 = 0.6;

/// 重み付き合計
///
/// 欠けている要素は `neutral` で補うので、重みは常に全て使われる。
/// 結果は [0, 1] にクランプする。
pub fn weighted_score(
    scores: &BTreeMap<QualityComponent, f64>,
    weights: &QualityWeights,
    neutral: f64,
) -> f64 {
    QualityComponent::ALL
        .iter()
        .map(|c| scores.get(c).copied().unwrap_or(neutral) * c.weight(weights))
        .sum::<f64>()
        .clamp(0.0, 1.0)
}

/// 品質評価器
#[derive(Debug, Clone)]
pub struct QualityAssessor {
    config: QualityConfig,
}

impl QualityAssessor {
    pub fn new(config: &QualityConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    pub fn assess(&self, inputs: &QualityInputs) -> QualityAssessment {
        let cfg = &self.config;
        let mut scores = BTreeMap::new();
        let mut issues = BTreeSet::new();

        let snr = inputs.metrics.snr_db;
        let snr_score = if snr > cfg.snr_high_db {
            1.0
        } else if snr > cfg.snr_mid_db {
            0.7
        } else if snr > cfg.snr_low_db {
            0.5
        } else {
            issues.insert(QualityIssue::LowSnr);
            0.2
        };
        scores.insert(QualityComponent::Snr, snr_score);

        let speech_ratio = inputs.vad.speech_ratio;
        let speech_score = if speech_ratio > cfg.speech_high_ratio {
            1.0
        } else if speech_ratio > cfg.speech_mid_ratio {
            0.8
        } else if speech_ratio > cfg.speech_low_ratio {
            0.6
        } else {
            issues.insert(QualityIssue::InsufficientSpeech);
            0.3
        };
        scores.insert(QualityComponent::SpeechContent, speech_score);

        let dynamic_range = inputs.metrics.dynamic_range;
        let range_score = if dynamic_range > cfg.dynamic_range_high {
            1.0
        } else if dynamic_range > cfg.dynamic_range_mid {
            0.7
        } else {
            issues.insert(QualityIssue::LowDynamicRange);
            0.4
        };
        scores.insert(QualityComponent::DynamicRange, range_score);

        let confidence = inputs.transcription_confidence.clamp(0.0, 1.0);
        if confidence < cfg.confidence_threshold {
            issues.insert(QualityIssue::LowTranscriptionConfidence);
        }
        scores.insert(QualityComponent::TranscriptionConfidence, confidence);

        if let Some(improvement) = inputs.snr_improvement {
            let effectiveness = if improvement > cfg.enhancement_high_db {
                1.0
            } else if improvement > cfg.enhancement_mid_db {
                0.8
            } else {
                0.5
            };
            scores.insert(QualityComponent::EnhancementEffectiveness, effectiveness);
        }

        let overall_score = weighted_score(&scores, &cfg.weights, cfg.neutral_score);
        let grade = QualityGrade::from_score(overall_score);

        log::info!(
            "品質評価: スコア {:.2} ({:?}), 問題点 {:?}",
            overall_score,
            grade,
            issues
        );

        QualityAssessment {
            overall_score,
            grade,
            component_scores: scores,
            issues,
            metrics: AssessmentMetrics {
                snr_db: snr,
                speech_ratio,
                dynamic_range,
                transcription_confidence: confidence,
                enhancement_improvement: inputs.snr_improvement.unwrap_or(0.0),
            },
        }
    }
}

/// 推奨事項を生成する
///
/// 問題点の集合・総合スコア・強調の有無だけから決まる純粋関数。
pub fn recommendations(
    issues: &BTreeSet<QualityIssue>,
    overall_score: f64,
    enhancement_applied: bool,
) -> Recommendations {
    let mut user_recommendations = Vec::new();
    let mut technical_suggestions = Vec::new();

    for issue in issues {
        match issue {
            QualityIssue::LowSnr => {
                user_recommendations.push(recommendation(
                    RecommendationKind::RecordingEnvironment,
                    "Reduce Background Noise",
                    "Record in a quieter environment or use noise-canceling equipment",
                    Priority::High,
                ));
                technical_suggestions.push("Use aggressive noise reduction".to_string());
            }
            QualityIssue::InsufficientSpeech => user_recommendations.push(recommendation(
                RecommendationKind::RecordingTechnique,
                "Increase Speech Content",
                "Speak more clearly and reduce silent pauses",
                Priority::Medium,
            )),
            QualityIssue::LowDynamicRange => user_recommendations.push(recommendation(
                RecommendationKind::RecordingEquipment,
                "Improve Recording Equipment",
                "Use a better microphone or adjust recording levels",
                Priority::Medium,
            )),
            QualityIssue::LowTranscriptionConfidence => user_recommendations.push(recommendation(
                RecommendationKind::SpeechClarity,
                "Improve Speech Clarity",
                "Speak more slowly and articulate words clearly",
                Priority::High,
            )),
            _ => {}
        }
    }

    if !enhancement_applied && overall_score < ENABLE_ENHANCEMENT_BELOW {
        technical_suggestions.push("Enable audio enhancement for better results".to_string());
    }

    Recommendations {
        user_recommendations,
        technical_suggestions,
        next_steps: NEXT_STEPS.iter().map(|s| s.to_string()).collect(),
    }
}

fn recommendation(
    kind: RecommendationKind,
    title: &str,
    description: &str,
    priority: Priority,
) -> UserRecommendation {
    UserRecommendation {
        kind,
        title: title.to_string(),
        description: description.to_string(),
        priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(snr_db: f64, speech_ratio: f64, dynamic_range: f64, confidence: f64) -> QualityInputs {
        QualityInputs {
            metrics: QualityMetrics {
                snr_db,
                rms: 0.1,
                dynamic_range,
                silence_ratio: 0.1,
            },
            vad: VadStatistics {
                total_duration: 10.0,
                speech_duration: 10.0 * speech_ratio,
                silence_duration: 10.0 * (1.0 - speech_ratio),
                speech_ratio,
                num_segments: 1,
                aggressiveness: 2,
            },
            snr_improvement: None,
            transcription_confidence: confidence,
        }
    }

    fn assessor() -> QualityAssessor {
        QualityAssessor::new(&QualityConfig::default())
    }

    #[test]
    fn test_snr_bands() {
        let a = assessor();
        let cases = [(25.0, 1.0), (15.0, 0.7), (5.0, 0.5), (0.0, 0.2), (-20.0, 0.2)];
        for (snr, expected) in cases {
            let result = a.assess(&inputs(snr, 0.8, 0.8, 0.9));
            assert_eq!(result.component_scores[&QualityComponent::Snr], expected, "snr {}", snr);
            assert_eq!(result.issues.contains(&QualityIssue::LowSnr), snr <= 0.0);
        }
    }

    #[test]
    fn test_low_speech_ratio_flags_insufficient_speech() {
        let result = assessor().assess(&inputs(25.0, 0.15, 0.8, 0.9));
        assert_eq!(result.component_scores[&QualityComponent::SpeechContent], 0.3);
        assert!(result.issues.contains(&QualityIssue::InsufficientSpeech));
    }

    #[test]
    fn test_speech_content_bands() {
        let a = assessor();
        for (ratio, expected) in [(0.8, 1.0), (0.5, 0.8), (0.3, 0.6), (0.2, 0.3)] {
            let result = a.assess(&inputs(25.0, ratio, 0.8, 0.9));
            assert_eq!(result.component_scores[&QualityComponent::SpeechContent], expected);
        }
    }

    #[test]
    fn test_dynamic_range_bands() {
        let a = assessor();
        for (range, expected) in [(0.6, 1.0), (0.3, 0.7), (0.1, 0.4)] {
            let result = a.assess(&inputs(25.0, 0.8, range, 0.9));
            assert_eq!(result.component_scores[&QualityComponent::DynamicRange], expected);
        }
        let low = a.assess(&inputs(25.0, 0.8, 0.1, 0.9));
        assert!(low.issues.contains(&QualityIssue::LowDynamicRange));
    }

    #[test]
    fn test_confidence_passes_through() {
        let result = assessor().assess(&inputs(25.0, 0.8, 0.8, 0.55));
        assert_eq!(
            result.component_scores[&QualityComponent::TranscriptionConfidence],
            0.55
        );
        assert!(result.issues.contains(&QualityIssue::LowTranscriptionConfidence));
    }

    #[test]
    fn test_enhancement_effectiveness_bands() {
        let a = assessor();
        for (improvement, expected) in [(7.0, 1.0), (3.0, 0.8), (1.0, 0.5), (-2.0, 0.5)] {
            let mut input = inputs(25.0, 0.8, 0.8, 0.9);
            input.snr_improvement = Some(improvement);
            let result = a.assess(&input);
            assert_eq!(
                result.component_scores[&QualityComponent::EnhancementEffectiveness],
                expected
            );
            assert_eq!(result.metrics.enhancement_improvement, improvement);
        }
    }

    #[test]
    fn test_missing_enhancement_uses_neutral_score() {
        let result = assessor().assess(&inputs(25.0, 0.8, 0.8, 1.0));
        assert!(!result
            .component_scores
            .contains_key(&QualityComponent::EnhancementEffectiveness));
        // 1.0 * 0.9 + 0.5 * 0.1
        assert!((result.overall_score - 0.95).abs() < 1e-9);
        assert_eq!(result.grade, QualityGrade::Excellent);
    }

    #[test]
    fn test_weighted_score_extremes() {
        let weights = QualityConfig::default().weights;
        let ones: BTreeMap<_, _> = QualityComponent::ALL.iter().map(|&c| (c, 1.0)).collect();
        let zeros: BTreeMap<_, _> = QualityComponent::ALL.iter().map(|&c| (c, 0.0)).collect();

        assert!((weighted_score(&ones, &weights, 0.5) - 1.0).abs() < 1e-12);
        assert_eq!(weighted_score(&zeros, &weights, 0.5), 0.0);
        assert!(weighted_score(&ones, &weights, 0.5) <= 1.0);
    }

    #[test]
    fn test_weighted_score_is_exact_sum() {
        let weights = QualityConfig::default().weights;
        let mut scores = BTreeMap::new();
        scores.insert(QualityComponent::Snr, 0.7);
        scores.insert(QualityComponent::SpeechContent, 0.6);
        scores.insert(QualityComponent::DynamicRange, 0.4);
        scores.insert(QualityComponent::TranscriptionConfidence, 0.8);
        scores.insert(QualityComponent::EnhancementEffectiveness, 1.0);

        let expected = 0.7 * 0.3 + 0.6 * 0.25 + 0.4 * 0.15 + 0.8 * 0.2 + 1.0 * 0.1;
        assert!((weighted_score(&scores, &weights, 0.5) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_grade_thresholds() {
        assert_eq!(QualityGrade::from_score(0.8), QualityGrade::Excellent);
        assert_eq!(QualityGrade::from_score(0.79), QualityGrade::Good);
        assert_eq!(QualityGrade::from_score(0.6), QualityGrade::Good);
        assert_eq!(QualityGrade::from_score(0.4), QualityGrade::Fair);
        assert_eq!(QualityGrade::from_score(0.39), QualityGrade::Poor);
    }

    #[test]
    fn test_configurable_thresholds() {
        let config = QualityConfig {
            snr_high_db: 30.0,
            ..QualityConfig::default()
        };
        let result = QualityAssessor::new(&config).assess(&inputs(25.0, 0.8, 0.8, 0.9));
        assert_eq!(result.component_scores[&QualityComponent::Snr], 0.7);
    }

    #[test]
    fn test_configurable_speech_and_range_bands() {
        let sample = inputs(25.0, 0.6, 0.3, 0.9);
        let default = QualityAssessor::new(&QualityConfig::default()).assess(&sample);
        assert_eq!(default.component_scores[&QualityComponent::SpeechContent], 0.8);
        assert_eq!(default.component_scores[&QualityComponent::DynamicRange], 0.7);

        let config = QualityConfig {
            speech_high_ratio: 0.5,
            dynamic_range_mid: 0.35,
            ..QualityConfig::default()
        };
        let custom = QualityAssessor::new(&config).assess(&sample);
        assert_eq!(custom.component_scores[&QualityComponent::SpeechContent], 1.0);
        assert_eq!(custom.component_scores[&QualityComponent::DynamicRange], 0.4);
        assert!(custom.issues.contains(&QualityIssue::LowDynamicRange));
        assert!(custom.overall_score != default.overall_score);
    }

    #[test]
    fn test_recommendations_follow_issues() {
        let issues: BTreeSet<_> = [QualityIssue::LowSnr, QualityIssue::LowTranscriptionConfidence]
            .into_iter()
            .collect();
        let recs = recommendations(&issues, 0.7, true);

        assert_eq!(recs.user_recommendations.len(), 2);
        assert_eq!(recs.user_recommendations[0].title, "Reduce Background Noise");
        assert_eq!(recs.user_recommendations[0].priority, Priority::High);
        assert_eq!(recs.user_recommendations[1].kind, RecommendationKind::SpeechClarity);
        assert_eq!(recs.technical_suggestions, vec!["Use aggressive noise reduction"]);
        assert_eq!(recs.next_steps.len(), 3);
    }

    #[test]
    fn test_recommends_enabling_enhancement() {
        let issues = BTreeSet::new();
        let recs = recommendations(&issues, 0.5, false);
        assert_eq!(
            recs.technical_suggestions,
            vec!["Enable audio enhancement for better results"]
        );

        assert!(recommendations(&issues, 0.5, true).technical_suggestions.is_empty());
        assert!(recommendations(&issues, 0.6, false).technical_suggestions.is_empty());
    }

    #[test]
    fn test_pipeline_issues_have_no_user_recommendations() {
        let issues: BTreeSet<_> = [QualityIssue::TranscriptionFailed].into_iter().collect();
        let recs = recommendations(&issues, 0.9, true);
        assert!(recs.user_recommendations.is_empty());
    }

    #[test]
    fn test_assessment_serializes_snake_case() {
        let result = assessor().assess(&inputs(-5.0, 0.1, 0.1, 0.3));
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["grade"], "poor");
        assert!(json["component_scores"]["speech_content"].is_number());
        let issues = json["issues"].as_array().unwrap();
        assert!(issues.contains(&serde_json::json!("insufficient_speech")));
    }
}
