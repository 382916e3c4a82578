use serde::Serialize;

use crate::analyzer::voice_analyzer::{GenderHint, VoiceProfile};

/// Secondary voices below this share are not shown.
const MIN_SECONDARY_PERCENT: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoiceShare {
    pub name: String,
    pub percent: u32,
}

/// Display-ready classifier result for the voice card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalysisSummary {
    pub gender: Option<GenderHint>,
    pub main_voice: String,
    pub main_percent: u32,
    /// Descending by share.
    pub secondary: Vec<VoiceShare>,
    pub matched_voice: Option<String>,
}

impl AnalysisSummary {
    pub fn from_profile(profile: &VoiceProfile, gender: Option<GenderHint>) -> Self {
        let mut secondary: Vec<VoiceShare> = profile
            .sub
            .iter()
            .map(|voice| VoiceShare {
                name: voice.name.clone(),
                percent: to_percent(voice.score),
            })
            .filter(|share| share.percent >= MIN_SECONDARY_PERCENT)
            .collect();
        secondary.sort_by(|a, b| b.percent.cmp(&a.percent));

        Self {
            gender,
            main_voice: profile.main.name.clone(),
            main_percent: to_percent(profile.main.score),
            secondary,
            matched_voice: profile.opposite_match.as_ref().map(|m| m.name.clone()),
        }
    }
}

fn to_percent(score: f64) -> u32 {
    if score.is_finite() && score > 0.0 {
        score.round() as u32
    } else {
        0
    }
}
