use std::fmt;

/// Modo de ecualización aplicado a la salida del guild.
///
/// El modo es un rótulo que el transporte traduce a su cadena de filtros;
/// el núcleo sólo lo guarda por guild y lo expone en el snapshot de la cola.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EffectMode {
    #[default]
    Normal,
    BassBoost,
    Nightcore,
    Vaporwave,
    EightD,
}

impl EffectMode {
    /// Interpreta el nombre de un modo tal como llega del comando.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "normal" | "off" => Some(Self::Normal),
            "bassboost" | "bass" => Some(Self::BassBoost),
            "nightcore" => Some(Self::Nightcore),
            "vaporwave" => Some(Self::Vaporwave),
            "8d" | "eightd" => Some(Self::EightD),
            _ => None,
        }
    }

    /// Nombre para mostrar en respuestas y logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Normal => "Normal",
            Self::BassBoost => "Bass Boost",
            Self::Nightcore => "Nightcore",
            Self::Vaporwave => "Vaporwave",
            Self::EightD => "8D",
        }
    }

    pub fn all() -> &'static [EffectMode] {
        &[
            Self::Normal,
            Self::BassBoost,
            Self::Nightcore,
            Self::Vaporwave,
            Self::EightD,
        ]
    }
}

impl fmt::Display for EffectMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_acepta_alias() {
        assert_eq!(EffectMode::parse("BASS"), Some(EffectMode::BassBoost));
        assert_eq!(EffectMode::parse("8d"), Some(EffectMode::EightD));
        assert_eq!(EffectMode::parse("off"), Some(EffectMode::Normal));
        assert_eq!(EffectMode::parse("reverb"), None);
    }

    #[test]
    fn test_default_es_normal() {
        assert_eq!(EffectMode::default(), EffectMode::Normal);
    }
}
