use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use super::{Enricher, EnrichmentLabels};
use crate::domain::{Emotion, SentimentLabel};
use crate::error::Result;

const NEGATION_SCALAR: f64 = -0.74;
const BOOSTER_INCREMENT: f64 = 0.293;
const EXCLAMATION_INCREMENT: f64 = 0.292;
const MAX_EXCLAMATIONS: usize = 4;
const NORMALIZATION_ALPHA: f64 = 15.0;
const NEGATION_WINDOW: usize = 3;

static TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z][a-z']*").expect("valid token regex"));

/// Word valence on a -4..4 scale
static VALENCE: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    [
        ("love", 3.2),
        ("loved", 2.9),
        ("loving", 2.9),
        ("great", 3.1),
        ("good", 1.9),
        ("amazing", 2.8),
        ("awesome", 3.1),
        ("excellent", 2.7),
        ("fantastic", 2.6),
        ("best", 3.2),
        ("nice", 1.8),
        ("enjoy", 2.2),
        ("enjoyed", 2.3),
        ("helpful", 1.8),
        ("interesting", 1.7),
        ("insightful", 2.0),
        ("informative", 1.5),
        ("funny", 1.9),
        ("fun", 2.3),
        ("thanks", 1.9),
        ("thank", 1.5),
        ("happy", 2.7),
        ("glad", 2.0),
        ("brilliant", 2.8),
        ("perfect", 2.7),
        ("wonderful", 2.7),
        ("beautiful", 2.9),
        ("liked", 1.8),
        ("recommend", 1.5),
        ("inspiring", 2.2),
        ("cool", 1.3),
        ("wow", 2.8),
        ("hope", 1.9),
        ("laugh", 2.6),
        ("laughed", 2.0),
        ("delighted", 2.9),
        ("bad", -2.5),
        ("terrible", -2.1),
        ("awful", -2.0),
        ("worst", -3.1),
        ("hate", -2.7),
        ("hated", -3.2),
        ("boring", -1.3),
        ("annoying", -1.7),
        ("sad", -2.1),
        ("poor", -2.1),
        ("disappointing", -2.2),
        ("disappointed", -1.9),
        ("wrong", -2.1),
        ("waste", -1.8),
        ("horrible", -2.5),
        ("stupid", -2.4),
        ("angry", -2.3),
        ("scary", -2.2),
        ("scared", -1.9),
        ("afraid", -2.2),
        ("worried", -1.2),
        ("fear", -2.2),
        ("problem", -1.7),
        ("disgusting", -2.4),
        ("gross", -2.1),
        ("ugly", -2.3),
        ("sucks", -1.5),
        ("lame", -1.8),
        ("fake", -2.1),
        ("misleading", -1.7),
        ("confusing", -0.9),
        ("unfortunately", -1.5),
        ("ridiculous", -1.5),
        ("cringe", -1.8),
        ("miss", -0.6),
        ("shocked", -1.3),
    ]
    .into_iter()
    .collect()
});

/// Degree modifiers: positive boosts, negative dampens
static BOOSTERS: Lazy<HashMap<&'static str, f64>> = Lazy::new(|| {
    let up = [
        "very",
        "really",
        "extremely",
        "so",
        "super",
        "incredibly",
        "absolutely",
        "totally",
        "truly",
        "completely",
        "highly",
        "especially",
        "most",
    ];
    let down = ["barely", "slightly", "kinda", "somewhat", "hardly", "marginally"];
    up.into_iter()
        .map(|w| (w, BOOSTER_INCREMENT))
        .chain(down.into_iter().map(|w| (w, -BOOSTER_INCREMENT)))
        .collect()
});

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "nobody", "nothing", "neither", "nor", "without", "cannot",
    "dont", "cant", "wont", "isnt", "didnt", "doesnt", "wasnt", "arent", "aint",
];

/// Emotion cue words, in the order ties are broken
static EMOTIONS: Lazy<Vec<(Emotion, &'static [&'static str])>> = Lazy::new(|| {
    vec![
        (
            Emotion::Joy,
            &[
                "love", "loved", "happy", "glad", "enjoy", "enjoyed", "fun", "funny", "great",
                "awesome", "amazing", "wonderful", "laugh", "laughed", "delighted",
            ][..],
        ),
        (
            Emotion::Sadness,
            &[
                "sad", "miss", "missed", "cry", "crying", "unfortunately", "disappointed",
                "disappointing", "lonely", "heartbreaking", "sorry",
            ][..],
        ),
        (
            Emotion::Anger,
            &["angry", "hate", "hated", "annoying", "furious", "mad", "outrageous", "ridiculous", "rage"][..],
        ),
        (
            Emotion::Fear,
            &["afraid", "scared", "scary", "fear", "worried", "anxious", "terrifying", "nervous"][..],
        ),
        (
            Emotion::Surprise,
            &["wow", "surprised", "surprising", "unexpected", "shocked", "shocking", "whoa", "omg"][..],
        ),
        (
            Emotion::Disgust,
            &["disgusting", "gross", "nasty", "vile", "sickening", "repulsive", "cringe"][..],
        ),
    ]
});

/// Offline rule-based sentiment scorer
#[derive(Debug, Clone, Default)]
pub struct LexiconEnricher;

impl LexiconEnricher {
    pub const MODEL: &'static str = "lexicon";

    pub fn new() -> Self {
        Self
    }

    /// Score synchronously; the trait impl wraps this.
    pub fn score(&self, text: &str) -> EnrichmentLabels {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = TOKEN.find_iter(&lowered).map(|m| m.as_str()).collect();
        let but_index = tokens.iter().rposition(|t| *t == "but");

        let mut sum = 0.0;
        for (i, token) in tokens.iter().enumerate() {
            let Some(&base) = VALENCE.get(token) else {
                continue;
            };
            let mut valence = base;

            if i > 0 {
                if let Some(&boost) = BOOSTERS.get(tokens[i - 1]) {
                    valence += boost * base.signum();
                }
            }
            let window = &tokens[i.saturating_sub(NEGATION_WINDOW)..i];
            if window.iter().any(|t| is_negation(t)) {
                valence *= NEGATION_SCALAR;
            }
            if let Some(b) = but_index {
                if i < b {
                    valence *= 0.5;
                } else if i > b {
                    valence *= 1.5;
                }
            }
            sum += valence;
        }

        if sum != 0.0 {
            let bangs = text.matches('!').count().min(MAX_EXCLAMATIONS) as f64;
            sum += bangs * EXCLAMATION_INCREMENT * sum.signum();
        }

        let compound = (sum / (sum * sum + NORMALIZATION_ALPHA).sqrt()).clamp(-1.0, 1.0);
        EnrichmentLabels {
            sentiment: SentimentLabel::from_score(compound),
            score: compound,
            emotion: detect_emotion(&tokens),
            confidence: (0.5 + compound.abs() / 2.0).min(1.0),
        }
    }
}

fn is_negation(token: &str) -> bool {
    NEGATIONS.contains(&token) || token.ends_with("n't")
}

fn detect_emotion(tokens: &[&str]) -> Emotion {
    let mut best = (Emotion::Neutral, 0usize);
    for (emotion, cues) in EMOTIONS.iter() {
        let hits = tokens.iter().filter(|t| cues.iter().any(|c| c == *t)).count();
        if hits > best.1 {
            best = (*emotion, hits);
        }
    }
    best.0
}

#[async_trait]
impl Enricher for LexiconEnricher {
    fn name(&self) -> &str {
        Self::MODEL
    }

    async fn enrich(&self, text: &str) -> Result<EnrichmentLabels> {
        Ok(self.score(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(text: &str) -> f64 {
        LexiconEnricher::new().score(text).score
    }

    #[test]
    fn labels_polarity() {
        let scorer = LexiconEnricher::new();
        assert_eq!(scorer.score("I love this episode").sentiment, SentimentLabel::Positive);
        assert_eq!(scorer.score("Worst interview ever").sentiment, SentimentLabel::Negative);
        assert_eq!(scorer.score("The episode is about history").sentiment, SentimentLabel::Neutral);
        assert_eq!(scorer.score("").score, 0.0);
    }

    #[test]
    fn compound_matches_normalization() {
        let expected = 3.2 / (3.2f64 * 3.2 + 15.0).sqrt();
        assert!((score("love") - expected).abs() < 1e-9);
    }

    #[test]
    fn negation_flips_within_window() {
        assert!(score("this is not good") < 0.0);
        assert!(score("I don't think it's good") < 0.0);
        // four tokens away is outside the window
        assert!(score("not that it was really good") > 0.0);
    }

    #[test]
    fn boosters_and_dampeners() {
        assert!(score("very good") > score("good"));
        assert!(score("slightly good") < score("good"));
        assert!(score("very bad") < score("bad"));
    }

    #[test]
    fn but_shifts_weight_to_later_clause() {
        assert!(score("The intro was bad but the interview was great") > 0.0);
        assert!(score("The interview was great but the audio was terrible") < score("great"));
    }

    #[test]
    fn exclamations_add_emphasis_up_to_four() {
        assert!(score("good!!") > score("good"));
        assert!((score("good!!!!") - score("good!!!!!!!")).abs() < 1e-12);
        assert_eq!(score("Is it on Spotify!!!"), 0.0);
    }

    #[test]
    fn emotion_by_cue_hits() {
        let scorer = LexiconEnricher::new();
        assert_eq!(scorer.score("so funny, loved it").emotion, Emotion::Joy);
        assert_eq!(scorer.score("I was scared and worried").emotion, Emotion::Fear);
        assert_eq!(scorer.score("new episode drops tuesday").emotion, Emotion::Neutral);
        // one joy hit and one anger hit: joy is declared first
        assert_eq!(scorer.score("love it, hate the ads").emotion, Emotion::Joy);
    }

    #[tokio::test]
    async fn trait_uses_lexicon_model_name() {
        let enricher = LexiconEnricher::new();
        assert_eq!(enricher.name(), "lexicon");
        let labels = enricher.enrich("great guest").await.unwrap();
        assert_eq!(labels.sentiment, SentimentLabel::Positive);
        assert!(labels.confidence > 0.5 && labels.confidence <= 1.0);
    }
}
