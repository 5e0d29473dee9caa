//! Per-challenge round scoring rules.
//!
//! Every round is reduced to one end-of-round delta; nothing here talks to the ledger.

use std::time::Duration;

use rand::{Rng, seq::SliceRandom};

/// Number of circles shown in a lucky-tap round.
pub const LUCKY_CIRCLES: usize = 10;
/// Points for hitting the lucky circle.
pub const LUCKY_TAP_POINTS: i64 = 10;
/// Base points for completing the logo board.
pub const MATCH_LOGOS_BASE_POINTS: i64 = 10;
/// Emoji pool used by the emoji battle.
pub const EMOJIS: [&str; 10] = ["😀", "😂", "💀", "🔥", "❤️", "🎉", "🚀", "⚡", "🎯", "👑"];

/// One point per registered shake.
pub fn shake_points(shakes: u32) -> i64 {
    i64::from(shakes)
}

/// Points for a lucky-tap attempt.
pub fn lucky_tap_points(tapped: usize, lucky: usize) -> i64 {
    if tapped == lucky { LUCKY_TAP_POINTS } else { 0 }
}

/// Points for one correct emoji answer given its response time.
pub fn emoji_points(response_time: Duration) -> i64 {
    match response_time.as_millis() {
        0..1_000 => 15,
        1_000..2_000 => 10,
        _ => 5,
    }
}

/// Time bonus for finishing the logo board.
pub fn match_logos_bonus(elapsed: Duration) -> i64 {
    match elapsed.as_secs_f64() {
        secs if secs < 20.0 => 5,
        secs if secs < 30.0 => 3,
        secs if secs < 50.0 => 2,
        _ => 0,
    }
}

/// Total award for a completed logo board.
pub fn match_logos_points(elapsed: Duration) -> i64 {
    MATCH_LOGOS_BASE_POINTS + match_logos_bonus(elapsed)
}

/// Pick the lucky circle for a new round.
pub fn draw_lucky_circle<R: Rng + ?Sized>(rng: &mut R) -> usize {
    rng.random_range(0..LUCKY_CIRCLES)
}

/// Emoji round prompt: the target plus the shuffled board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmojiPrompt {
    /// Emoji the player must find.
    pub target: &'static str,
    /// Board in display order; always contains the target.
    pub options: Vec<&'static str>,
}

/// Draw a fresh emoji prompt.
pub fn draw_emoji_prompt<R: Rng + ?Sized>(rng: &mut R) -> EmojiPrompt {
    let target = EMOJIS[rng.random_range(0..EMOJIS.len())];
    let mut options = EMOJIS.to_vec();
    options.shuffle(rng);
    EmojiPrompt { target, options }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emoji_points_step_down_with_time() {
        assert_eq!(emoji_points(Duration::from_millis(400)), 15);
        assert_eq!(emoji_points(Duration::from_millis(999)), 15);
        assert_eq!(emoji_points(Duration::from_millis(1_000)), 10);
        assert_eq!(emoji_points(Duration::from_millis(1_999)), 10);
        assert_eq!(emoji_points(Duration::from_secs(9)), 5);
    }

    #[test]
    fn match_logos_bonus_thresholds() {
        assert_eq!(match_logos_points(Duration::from_secs(12)), 15);
        assert_eq!(match_logos_points(Duration::from_secs(25)), 13);
        assert_eq!(match_logos_points(Duration::from_secs(49)), 12);
        assert_eq!(match_logos_points(Duration::from_secs(50)), 10);
    }

    #[test]
    fn lucky_tap_only_pays_on_hit() {
        let mut rng = rand::rng();
        let lucky = draw_lucky_circle(&mut rng);
        assert!(lucky < LUCKY_CIRCLES);
        assert_eq!(lucky_tap_points(lucky, lucky), LUCKY_TAP_POINTS);
        assert_eq!(lucky_tap_points((lucky + 1) % LUCKY_CIRCLES, lucky), 0);
    }

    #[test]
    fn emoji_prompt_contains_target() {
        let prompt = draw_emoji_prompt(&mut rand::rng());
        assert_eq!(prompt.options.len(), EMOJIS.len());
        assert!(prompt.options.contains(&prompt.target));
    }

    #[test]
    fn shake_points_match_count() {
        assert_eq!(shake_points(0), 0);
        assert_eq!(shake_points(42), 42);
    }
}
