pub mod practice;
pub mod share;

use chrono::{DateTime, Utc};

pub use practice::{GameMode, PracticeSession, PracticeStats};

/// Sets are capped at this many words. The cap is enforced by whoever builds the
/// word list (see [`validate_words`]); stores accept whatever they are given.
pub const MAX_WORDS_PER_SET: usize = 20;

pub const GUEST_EMAIL_DOMAIN: &str = "exquizite.local";
pub const DEFAULT_GUEST_NAME: &str = "Guest";

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WordPair {
    pub id: String,
    pub word: String,
    pub translation: String,
}

impl WordPair {
    /// Builds a pair with a fresh id. Both sides are trimmed and must be non-empty.
    pub fn new(word: &str, translation: &str) -> Result<Self, WordPairError> {
        let word = word.trim();
        let translation = translation.trim();
        if word.is_empty() {
            return Err(WordPairError::EmptyWord);
        }
        if translation.is_empty() {
            return Err(WordPairError::EmptyTranslation {
                word: word.to_string(),
            });
        }
        Ok(Self {
            id: new_id(),
            word: word.to_string(),
            translation: translation.to_string(),
        })
    }

    /// True if the two pairs teach the same thing, ignoring ids.
    pub fn same_content(&self, other: &WordPair) -> bool {
        self.word == other.word && self.translation == other.translation
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum WordPairError {
    #[error("word must not be empty")]
    EmptyWord,
    #[error("translation for `{word}` must not be empty")]
    EmptyTranslation { word: String },
    #[error("a set holds at most {max} words, got {got}")]
    TooManyWords { max: usize, got: usize },
    #[error("a set needs at least one word")]
    NoWords,
}

/// Checks a word list before it is handed to a store.
pub fn validate_words(words: &[WordPair]) -> Result<(), WordPairError> {
    if words.is_empty() {
        return Err(WordPairError::NoWords);
    }
    if words.len() > MAX_WORDS_PER_SET {
        return Err(WordPairError::TooManyWords {
            max: MAX_WORDS_PER_SET,
            got: words.len(),
        });
    }
    for pair in words {
        if pair.word.trim().is_empty() {
            return Err(WordPairError::EmptyWord);
        }
        if pair.translation.trim().is_empty() {
            return Err(WordPairError::EmptyTranslation {
                word: pair.word.clone(),
            });
        }
    }
    Ok(())
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WordSet {
    pub id: String,
    pub name: String,
    pub words: Vec<WordPair>,
    pub target_language: String,
    pub native_language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practiced: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_copy: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_shareable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_author_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_featured: Option<bool>,
}

impl WordSet {
    /// The part of a set that an update replaces wholesale.
    pub fn content(&self) -> SetContent<'_> {
        SetContent {
            name: &self.name,
            words: &self.words,
            target_language: &self.target_language,
            native_language: &self.native_language,
        }
    }

    pub fn is_featured(&self) -> bool {
        self.is_featured.unwrap_or(false)
    }
}

/// Borrowed view of the four fields that create and update operate on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SetContent<'a> {
    pub name: &'a str,
    pub words: &'a [WordPair],
    pub target_language: &'a str,
    pub native_language: &'a str,
}

impl SetContent<'_> {
    /// Compares words by content only; stores are free to re-id pairs.
    pub fn matches(&self, other: &SetContent<'_>) -> bool {
        self.name == other.name
            && self.target_language == other.target_language
            && self.native_language == other.native_language
            && self.words.len() == other.words.len()
            && self
                .words
                .iter()
                .zip(other.words)
                .all(|(a, b)| a.same_content(b))
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GuestIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub is_guest: bool,
}

impl GuestIdentity {
    pub fn new(name: Option<&str>) -> Self {
        Self {
            id: new_id(),
            name: name.unwrap_or(DEFAULT_GUEST_NAME).to_string(),
            email: guest_email(),
            is_guest: true,
        }
    }
}

/// Fields of a guest identity that may be changed after creation.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GuestIdentityUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl GuestIdentityUpdate {
    pub fn apply(self, identity: &mut GuestIdentity) {
        if let Some(name) = self.name {
            identity.name = name;
        }
        if let Some(email) = self.email {
            identity.email = email;
        }
    }
}

/// A synthetic, unique address of the form `guest_<uuid>@exquizite.local`.
pub fn guest_email() -> String {
    format!("guest_{}@{GUEST_EMAIL_DOMAIN}", new_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_pair_is_trimmed() {
        let pair = WordPair::new("  le chat ", "the cat\n").unwrap();
        assert_eq!(pair.word, "le chat");
        assert_eq!(pair.translation, "the cat");
        assert!(!pair.id.is_empty());
    }

    #[test]
    fn test_word_pair_rejects_blank_sides() {
        assert_eq!(WordPair::new("   ", "cat"), Err(WordPairError::EmptyWord));
        assert_eq!(
            WordPair::new("chat", ""),
            Err(WordPairError::EmptyTranslation {
                word: "chat".to_string()
            })
        );
    }

    #[test]
    fn test_validate_words_bounds() {
        assert_eq!(validate_words(&[]), Err(WordPairError::NoWords));

        let words: Vec<WordPair> = (0..MAX_WORDS_PER_SET)
            .map(|i| WordPair::new(&format!("w{i}"), &format!("t{i}")).unwrap())
            .collect();
        assert_eq!(validate_words(&words), Ok(()));

        let mut too_many = words.clone();
        too_many.push(WordPair::new("extra", "extra").unwrap());
        assert_eq!(
            validate_words(&too_many),
            Err(WordPairError::TooManyWords {
                max: MAX_WORDS_PER_SET,
                got: MAX_WORDS_PER_SET + 1
            })
        );
    }

    #[test]
    fn test_guest_email_format() {
        let email = guest_email();
        let local = email
            .strip_prefix("guest_")
            .and_then(|rest| rest.strip_suffix("@exquizite.local"))
            .unwrap();
        assert!(uuid::Uuid::parse_str(local).is_ok());
        assert_ne!(guest_email(), email);
    }

    #[test]
    fn test_guest_identity_defaults() {
        let guest = GuestIdentity::new(None);
        assert_eq!(guest.name, "Guest");
        assert!(guest.is_guest);

        let named = GuestIdentity::new(Some("John"));
        assert_eq!(named.name, "John");
        assert_ne!(named.id, guest.id);
    }

    #[test]
    fn test_word_set_json_uses_camel_case_and_skips_absent_fields() {
        let now = Utc::now();
        let set = WordSet {
            id: "1".to_string(),
            name: "Animals".to_string(),
            words: vec![],
            target_language: "es".to_string(),
            native_language: "en".to_string(),
            created_at: now,
            updated_at: now,
            last_practiced: None,
            is_copy: None,
            is_shareable: None,
            original_author_id: None,
            is_featured: None,
        };
        let json = serde_json::to_value(&set).unwrap();
        assert_eq!(json["targetLanguage"], "es");
        assert!(json.get("lastPracticed").is_none());
        assert!(json.get("isFeatured").is_none());

        let back: WordSet = serde_json::from_value(json).unwrap();
        assert_eq!(back, set);
    }

    #[test]
    fn test_content_matches_ignores_pair_ids() {
        let a = vec![WordPair::new("perro", "dog").unwrap()];
        let b = vec![WordPair::new("perro", "dog").unwrap()];
        let left = SetContent {
            name: "Animals",
            words: &a,
            target_language: "es",
            native_language: "en",
        };
        let right = SetContent { words: &b, ..left };
        assert!(left.matches(&right));
        assert!(!left.matches(&SetContent {
            name: "Colors",
            ..right
        }));
    }
}
