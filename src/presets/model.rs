use serde::{Deserialize, Serialize};

use crate::effects::EffectSpec;

/// A named bundle of effects plus the global knobs applied to them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Multiplier applied to every effect of the preset.
    #[serde(default = "default_effect_intensity")]
    pub effect_intensity: f32,
    /// Seconds before a beat during which anticipation effects build up.
    #[serde(default = "default_anticipation_time")]
    pub anticipation_time: f32,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

fn default_effect_intensity() -> f32 {
    1.0
}

fn default_anticipation_time() -> f32 {
    0.2
}

impl Preset {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::FeatureKind;
    use crate::effects::EffectType;

    #[test]
    fn minimal_json_gets_defaults() {
        let p = Preset::from_json(r#"{"name":"Bare"}"#).unwrap();
        assert_eq!(p.effect_intensity, 1.0);
        assert_eq!(p.anticipation_time, 0.2);
        assert!(p.effects.is_empty());
    }

    #[test]
    fn json_round_trip_is_identical() {
        let p = Preset {
            name: "Mine".into(),
            description: "test".into(),
            effect_intensity: 0.7,
            anticipation_time: 0.35,
            effects: vec![
                EffectSpec::new(EffectType::Warp, 0.5, FeatureKind::Energy)
                    .with_param("speed", serde_json::json!(2.5)),
                EffectSpec::new(EffectType::Glitch, 1.0, FeatureKind::Onsets),
            ],
        };
        assert_eq!(Preset::from_json(&p.to_json().unwrap()).unwrap(), p);
    }
}
