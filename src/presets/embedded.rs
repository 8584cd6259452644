/// Built-in preset JSON compiled into the binary, keyed by lowercase id.
pub fn embedded_presets() -> &'static [(&'static str, &'static str)] {
    &[
        ("standard", include_str!("../../presets/standard.json")),
        ("subtle", include_str!("../../presets/subtle.json")),
        ("intense", include_str!("../../presets/intense.json")),
        ("cinematic", include_str!("../../presets/cinematic.json")),
        ("glitch", include_str!("../../presets/glitch.json")),
    ]
}

pub fn embedded_preset(id: &str) -> Option<&'static str> {
    embedded_presets()
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(id))
        .map(|(_, json)| *json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presets::Preset;

    #[test]
    fn every_builtin_parses() {
        for (id, json) in embedded_presets() {
            let preset = Preset::from_json(json).unwrap_or_else(|e| panic!("{}: {}", id, e));
            assert!(!preset.effects.is_empty(), "{} has no effects", id);
            assert!(preset.effect_intensity > 0.0);
        }
    }

    #[test]
    fn lookup_ignores_case() {
        assert!(embedded_preset("STANDARD").is_some());
        assert!(embedded_preset("nope").is_none());
    }
}
