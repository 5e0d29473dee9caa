//! Static challenge and poll catalog built once at start-up.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Identifier of a catalog challenge (`poll`, `shake`, ...).
pub type ChallengeId = String;
/// Identifier of a poll question.
pub type QuestionId = String;

/// Mini-game families the arena knows how to score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeKind {
    /// Shake the device as often as possible.
    Shake,
    /// Rapid-fire audience polls.
    Poll,
    /// Tap the lucky circle.
    LuckyTap,
    /// Pick the emoji matching a prompt.
    Emoji,
    /// Match company logos to names.
    MatchLogos,
}

/// Immutable catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ChallengeDefinition {
    /// Stable identifier.
    pub id: ChallengeId,
    /// Scoring family.
    pub kind: ChallengeKind,
    /// Short title shown to players.
    pub title: String,
    /// One-line description.
    pub description: String,
    /// Suggested round length in seconds.
    pub duration_secs: u32,
}

/// How a closed question decides its winning options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum PollScoring {
    /// Options tied for the most votes win.
    Plurality,
    /// The option whose bucket holds the live participant count wins.
    ClosestBucket {
        /// One bucket per option, in option order.
        buckets: Vec<CountBucket>,
    },
}

/// Inclusive participant-count range; `max == None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CountBucket {
    /// Lowest count in the bucket.
    pub min: u32,
    /// Highest count in the bucket, if bounded.
    pub max: Option<u32>,
}

impl CountBucket {
    /// Distance from `count` to this bucket; zero when the count falls inside it.
    pub fn distance(&self, count: u32) -> u32 {
        if count < self.min {
            self.min - count
        } else {
            match self.max {
                Some(max) if count > max => count - max,
                _ => 0,
            }
        }
    }
}

/// Poll question offered during the poll challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PollQuestion {
    /// Stable identifier.
    pub id: QuestionId,
    /// Question text.
    pub prompt: String,
    /// Answer labels indexed by option index.
    pub options: Vec<String>,
    /// Winning rule applied on close.
    pub scoring: PollScoring,
}

impl PollQuestion {
    /// Whether `option_index` designates one of this question's options.
    pub fn has_option(&self, option_index: u32) -> bool {
        (option_index as usize) < self.options.len()
    }
}

/// Lookup tables for challenges and poll questions.
#[derive(Debug, Clone, Default)]
pub struct ChallengeCatalog {
    challenges: IndexMap<ChallengeId, ChallengeDefinition>,
    questions: IndexMap<QuestionId, PollQuestion>,
}

impl ChallengeCatalog {
    /// Build a catalog, keeping the first entry when identifiers repeat.
    pub fn new(challenges: Vec<ChallengeDefinition>, questions: Vec<PollQuestion>) -> Self {
        let mut catalog = Self::default();
        for challenge in challenges {
            catalog
                .challenges
                .entry(challenge.id.clone())
                .or_insert(challenge);
        }
        for question in questions {
            catalog.questions.entry(question.id.clone()).or_insert(question);
        }
        catalog
    }

    /// Look up a challenge definition.
    pub fn challenge(&self, id: &str) -> Option<&ChallengeDefinition> {
        self.challenges.get(id)
    }

    /// All challenge definitions in catalog order.
    pub fn challenges(&self) -> impl Iterator<Item = &ChallengeDefinition> {
        self.challenges.values()
    }

    /// Look up a poll question.
    pub fn question(&self, id: &str) -> Option<&PollQuestion> {
        self.questions.get(id)
    }

    /// All poll questions in catalog order.
    pub fn questions(&self) -> impl Iterator<Item = &PollQuestion> {
        self.questions.values()
    }
}

/// Built-in challenge list.
pub fn default_challenges() -> Vec<ChallengeDefinition> {
    let entry = |id: &str, kind, title: &str, description: &str, duration_secs| {
        ChallengeDefinition {
            id: id.into(),
            kind,
            title: title.into(),
            description: description.into(),
            duration_secs,
        }
    };

    vec![
        entry(
            "poll",
            ChallengeKind::Poll,
            "Rapid Fire Polls",
            "Vote fast, the crowd decides",
            30,
        ),
        entry(
            "shake",
            ChallengeKind::Shake,
            "Shake War",
            "Shake your phone as hard as you can",
            10,
        ),
        entry(
            "lucky-tap",
            ChallengeKind::LuckyTap,
            "Lucky Tap",
            "Tap the lucky circle before it moves",
            5,
        ),
        entry(
            "emoji",
            ChallengeKind::Emoji,
            "Emoji Battle",
            "Pick the matching emoji first",
            15,
        ),
        entry(
            "match-logos",
            ChallengeKind::MatchLogos,
            "Match the Logos",
            "Pair every logo with its name",
            60,
        ),
    ]
}

/// Built-in poll questions.
pub fn default_questions() -> Vec<PollQuestion> {
    let plurality = |id: &str, prompt: &str, options: &[&str]| PollQuestion {
        id: id.into(),
        prompt: prompt.into(),
        options: options.iter().map(|o| o.to_string()).collect(),
        scoring: PollScoring::Plurality,
    };

    vec![
        plurality("platform", "Team Android or iPhone?", &["Android", "iPhone"]),
        plurality(
            "framework",
            "Which framework would you trust your life with?",
            &["React", "Flutter", "Vue", "Angular"],
        ),
        plurality(
            "backend",
            "Backend of choice?",
            &["Node.js", "Python", "Go", "Java"],
        ),
        PollQuestion {
            id: "crowd-size".into(),
            prompt: "How many players are in the arena right now?".into(),
            options: vec!["0-10".into(), "11-25".into(), "26-50".into(), "51+".into()],
            scoring: PollScoring::ClosestBucket {
                buckets: vec![
                    CountBucket { min: 0, max: Some(10) },
                    CountBucket { min: 11, max: Some(25) },
                    CountBucket { min: 26, max: Some(50) },
                    CountBucket { min: 51, max: None },
                ],
            },
        },
    ]
}
