//! Maps spoken commands to access-flow intents.

use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum Intent {
    Register,
    Exit,
    Login,
    QueryLastLogin,
    Unrecognized,
}

/// Lower-case with Turkish rules for `İ` and `I`, which `str::to_lowercase`
/// maps to `i̇` and `i`.
pub fn fold_case(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'İ' => 'i',
            'I' => 'ı',
            c => c,
        })
        .collect::<String>()
        .to_lowercase()
}

/// Reference phrases. Matching is by substring, so order matters.
pub const PHRASES: &[(&str, Intent)] = &[
    ("yeni kullanıcı", Intent::Register),
    ("ana menü", Intent::Exit),
    ("giriş yap", Intent::Login),
    ("en son kim girmiş", Intent::QueryLastLogin),
];

/// Ordered substring router; the first matching phrase wins.
#[derive(Debug, Clone)]
pub struct VoiceCommandRouter {
    table: Vec<(String, Intent)>,
}

impl Default for VoiceCommandRouter {
    fn default() -> Self {
        Self::new(PHRASES.iter().map(|&(p, i)| (p.to_string(), i)))
    }
}

impl VoiceCommandRouter {
    /// Build a router from `(phrase, intent)` pairs.
    ///
    /// Phrases are case-folded and tried longest first, so a phrase that
    /// contains another is always checked before it. Ties keep input order.
    pub fn new<I>(phrases: I) -> Self
    where
        I: IntoIterator<Item = (String, Intent)>,
    {
        let mut table: Vec<(String, Intent)> = phrases
            .into_iter()
            .map(|(p, i)| (fold_case(p.trim()), i))
            .filter(|(p, _)| !p.is_empty())
            .collect();
        table.sort_by_key(|(p, _)| std::cmp::Reverse(p.chars().count()));
        Self { table }
    }

    pub fn route(&self, transcript: &str) -> Intent {
        let normalized = fold_case(transcript.trim());
        let intent = self
            .table
            .iter()
            .find(|(phrase, _)| normalized.contains(phrase.as_str()))
            .map(|&(_, intent)| intent)
            .unwrap_or(Intent::Unrecognized);
        log::debug!("🧭 '{}' -> {}", normalized, intent);
        intent
    }

    pub fn phrases(&self) -> impl Iterator<Item = &str> {
        self.table.iter().map(|(p, _)| p.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_reference_phrases() {
        let router = VoiceCommandRouter::default();
        assert_eq!(router.route("Giriş yap lütfen"), Intent::Login);
        assert_eq!(router.route("yeni kullanıcı ekle"), Intent::Register);
        assert_eq!(router.route("ANA MENÜ"), Intent::Exit);
        assert_eq!(router.route("en son kim girmiş"), Intent::QueryLastLogin);
        assert_eq!(router.route("hava nasıl"), Intent::Unrecognized);
        assert_eq!(router.route(""), Intent::Unrecognized);
        assert_eq!(
            router.route("yeni kullanıcı kaydı istiyorum"),
            Intent::Register
        );
        assert_eq!(router.route("ana menüye dön"), Intent::Exit);
    }

    #[test]
    fn test_turkish_capitals_fold() {
        assert_eq!(fold_case("GİRİŞ YAP"), "giriş yap");
        assert_eq!(fold_case("KAYDI"), "kaydı");

        let router = VoiceCommandRouter::default();
        assert_eq!(router.route("GİRİŞ YAP"), Intent::Login);
        assert_eq!(router.route("YENİ KULLANICI"), Intent::Register);
        assert_eq!(router.route("En Son Kim Girmiş"), Intent::QueryLastLogin);
    }

    #[test]
    fn test_every_intent_but_fallback_has_a_phrase() {
        for intent in Intent::iter().filter(|i| *i != Intent::Unrecognized) {
            assert!(PHRASES.iter().any(|(_, i)| *i == intent), "{} unreachable", intent);
        }
    }

    #[test]
    fn test_containing_phrase_checked_first() {
        let router = VoiceCommandRouter::new([
            ("giriş".to_string(), Intent::Login),
            ("giriş kaydı sil".to_string(), Intent::Exit),
        ]);
        assert_eq!(router.route("giriş kaydı sil"), Intent::Exit);
        assert_eq!(router.route("giriş"), Intent::Login);

        let phrases: Vec<&str> = router.phrases().collect();
        for (i, earlier) in phrases.iter().enumerate() {
            for later in &phrases[i + 1..] {
                assert!(!later.contains(earlier) || later == earlier);
            }
        }
    }
}
