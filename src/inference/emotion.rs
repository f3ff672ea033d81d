//! Emotion labels and per-face confidence scores

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Emotion {
    Anger,
    Contempt,
    Disgust,
    Fear,
    Happiness,
    Neutral,
    Sadness,
    Surprise,
}

impl Emotion {
    /// Enumeration order; also the tie-break order for [`EmotionScores::dominant`].
    pub const ALL: [Emotion; 8] = [
        Emotion::Anger,
        Emotion::Contempt,
        Emotion::Disgust,
        Emotion::Fear,
        Emotion::Happiness,
        Emotion::Neutral,
        Emotion::Sadness,
        Emotion::Surprise,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Emotion::Anger => "Anger",
            Emotion::Contempt => "Contempt",
            Emotion::Disgust => "Disgust",
            Emotion::Fear => "Fear",
            Emotion::Happiness => "Happiness",
            Emotion::Neutral => "Neutral",
            Emotion::Sadness => "Sadness",
            Emotion::Surprise => "Surprise",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Confidence per emotion, each in `[0, 1]`.
///
/// Field names match the service's `faceAttributes.emotion` object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionScores {
    pub anger: f64,
    pub contempt: f64,
    pub disgust: f64,
    pub fear: f64,
    pub happiness: f64,
    pub neutral: f64,
    pub sadness: f64,
    pub surprise: f64,
}

impl EmotionScores {
    pub fn score(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Anger => self.anger,
            Emotion::Contempt => self.contempt,
            Emotion::Disgust => self.disgust,
            Emotion::Fear => self.fear,
            Emotion::Happiness => self.happiness,
            Emotion::Neutral => self.neutral,
            Emotion::Sadness => self.sadness,
            Emotion::Surprise => self.surprise,
        }
    }

    pub fn set(&mut self, emotion: Emotion, value: f64) {
        let slot = match emotion {
            Emotion::Anger => &mut self.anger,
            Emotion::Contempt => &mut self.contempt,
            Emotion::Disgust => &mut self.disgust,
            Emotion::Fear => &mut self.fear,
            Emotion::Happiness => &mut self.happiness,
            Emotion::Neutral => &mut self.neutral,
            Emotion::Sadness => &mut self.sadness,
            Emotion::Surprise => &mut self.surprise,
        };
        *slot = value;
    }

    /// Scores in enumeration order
    pub fn iter(&self) -> impl Iterator<Item = (Emotion, f64)> + '_ {
        Emotion::ALL.iter().map(move |&e| (e, self.score(e)))
    }

    /// Highest-scoring emotion. A later label only wins with a strictly
    /// greater score, so ties go to the earlier label.
    pub fn dominant(&self) -> (Emotion, f64) {
        let mut best = (Emotion::ALL[0], self.score(Emotion::ALL[0]));
        for (emotion, score) in self.iter().skip(1) {
            if score > best.1 {
                best = (emotion, score);
            }
        }
        best
    }
}

impl FromIterator<(Emotion, f64)> for EmotionScores {
    fn from_iter<I: IntoIterator<Item = (Emotion, f64)>>(iter: I) -> Self {
        let mut scores = EmotionScores::default();
        for (emotion, value) in iter {
            scores.set(emotion, value);
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn tie_goes_to_earlier_label() {
        let scores: EmotionScores = [
            (Emotion::Anger, 0.2),
            (Emotion::Happiness, 0.9),
            (Emotion::Neutral, 0.9),
        ]
        .into_iter()
        .collect();
        assert_eq!(scores.dominant(), (Emotion::Happiness, 0.9));
    }

    #[test]
    fn all_zero_is_anger() {
        assert_eq!(EmotionScores::default().dominant().0, Emotion::Anger);
    }

    #[test]
    fn last_label_can_win() {
        let scores: EmotionScores = [(Emotion::Surprise, 0.95), (Emotion::Fear, 0.05)]
            .into_iter()
            .collect();
        assert_eq!(scores.dominant().0, Emotion::Surprise);
        assert_eq!(Emotion::Surprise.to_string(), "Surprise");
    }

    #[test]
    fn deserializes_service_field_names() {
        let scores: EmotionScores = serde_json::from_str(
            r#"{"anger":0.0,"contempt":0.01,"disgust":0.0,"fear":0.0,
                "happiness":0.98,"neutral":0.01,"sadness":0.0,"surprise":0.0}"#,
        )
        .unwrap();
        assert_eq!(scores.happiness, 0.98);
        assert_eq!(scores.dominant().0, Emotion::Happiness);
    }

    proptest! {
        #[test]
        fn dominant_is_first_maximum(values in proptest::collection::vec(0.0f64..=1.0, 8)) {
            let scores: EmotionScores = Emotion::ALL.iter().copied().zip(values.iter().copied()).collect();
            let max = values.iter().cloned().fold(f64::MIN, f64::max);
            let first = values.iter().position(|&v| v == max).unwrap();

            let (emotion, score) = scores.dominant();
            prop_assert_eq!(emotion, Emotion::ALL[first]);
            prop_assert_eq!(score, max);
        }

        #[test]
        fn ties_keep_enumeration_order(score in 0.0f64..=1.0, a in 0usize..8, b in 0usize..8) {
            prop_assume!(a != b);
            let scores: EmotionScores = [(Emotion::ALL[a], score), (Emotion::ALL[b], score)]
                .into_iter()
                .collect();
            let expected = if score > 0.0 { Emotion::ALL[a.min(b)] } else { Emotion::Anger };
            prop_assert_eq!(scores.dominant().0, expected);
        }
    }
}
