/// Collation strength: how much of a string's distinguishing detail
/// survives into its sort key, weakest (most folded) to strongest
/// (closest to the original bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collation {
    /// Case- and accent-insensitive, punctuation stripped.
    Primary,
    /// Case-insensitive, accent-sensitive.
    Secondary,
    /// Case- and accent-sensitive.
    Tertiary,
    /// Same ordering as `Tertiary`; kept as a distinct level so a caller
    /// can request it without the extractor rejecting the value, but this
    /// engine doesn't implement a punctuation-weight distinction beyond
    /// `Tertiary`.
    Quaternary,
    /// Exact byte comparison.
    Identical,
}

impl Default for Collation {
    fn default() -> Self {
        Collation::Tertiary
    }
}

/// Folds a string to its collation key for the given strength. Accent
/// stripping covers the common Latin-1 diacritics; it is not a full
/// Unicode decomposition.
pub fn fold(s: &str, strength: Collation) -> String {
    match strength {
        Collation::Primary => {
            strip_accents(&s.to_lowercase()).chars().filter(|c| c.is_alphanumeric()).collect()
        }
        Collation::Secondary => s.to_lowercase(),
        Collation::Tertiary | Collation::Quaternary | Collation::Identical => s.to_string(),
    }
}

fn strip_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' => 'a',
            'è' | 'é' | 'ê' | 'ë' => 'e',
            'ì' | 'í' | 'î' | 'ï' => 'i',
            'ò' | 'ó' | 'ô' | 'õ' | 'ö' => 'o',
            'ù' | 'ú' | 'û' | 'ü' => 'u',
            'ý' | 'ÿ' => 'y',
            'ç' => 'c',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_folds_case_accent_and_punctuation() {
        assert_eq!(fold("Café!", Collation::Primary), "cafe");
    }

    #[test]
    fn secondary_keeps_accents_drops_case() {
        assert_eq!(fold("Café", Collation::Secondary), "café");
    }

    #[test]
    fn tertiary_is_unmodified() {
        assert_eq!(fold("Café", Collation::Tertiary), "Café");
    }
}
