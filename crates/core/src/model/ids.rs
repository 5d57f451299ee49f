use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque identifier for a user, guest or authenticated.
///
/// Guest ids are generated device-side and carry a `guest_` prefix so stored
/// keys stay recognizable; authenticated ids come from the account provider.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a new `UserId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if this id carries the device-generated guest prefix.
    #[must_use]
    pub fn is_guest_id(&self) -> bool {
        self.0.starts_with("guest_")
    }
}

/// Index of a module in the catalog, starting at zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(u32);

impl ModuleId {
    /// Creates a new `ModuleId`
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Returns the id of the module after this one.
    #[must_use]
    pub fn next(&self) -> ModuleId {
        ModuleId(self.0.saturating_add(1))
    }
}

/// Unique identifier for an achievement
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AchievementId(u32);

impl AchievementId {
    /// Creates a new `AchievementId`
    #[must_use]
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Returns the underlying u32 value
    #[must_use]
    pub fn value(&self) -> u32 {
        self.0
    }
}

/// Canonical key for one question inside one module.
///
/// Renders as `<module>-<question>` and is used as the map key for answered
/// questions, both in memory and in persisted payloads.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QuestionKey {
    module: ModuleId,
    question: u32,
}

impl QuestionKey {
    /// Creates a new `QuestionKey`
    #[must_use]
    pub fn new(module: ModuleId, question: u32) -> Self {
        Self { module, question }
    }

    /// Returns the module this key belongs to
    #[must_use]
    pub fn module(&self) -> ModuleId {
        self.module
    }

    /// Returns the question index within the module
    #[must_use]
    pub fn question(&self) -> u32 {
        self.question
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Debug for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ModuleId({})", self.0)
    }
}

impl fmt::Debug for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AchievementId({})", self.0)
    }
}

impl fmt::Debug for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QuestionKey({}-{})", self.module.0, self.question)
    }
}

// ─── Display Implementations ───────────────────────────────────────────────────

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AchievementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for QuestionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.module.0, self.question)
    }
}

// ─── FromStr Implementations ───────────────────────────────────────────────────

/// Error type for parsing an id or key from a string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseKeyError {
    kind: String,
}

impl fmt::Display for ParseKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse {} from string", self.kind)
    }
}

impl std::error::Error for ParseKeyError {}

impl FromStr for ModuleId {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(ModuleId::new)
            .map_err(|_| ParseKeyError {
                kind: "ModuleId".to_string(),
            })
    }
}

impl FromStr for AchievementId {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .map(AchievementId::new)
            .map_err(|_| ParseKeyError {
                kind: "AchievementId".to_string(),
            })
    }
}

impl FromStr for QuestionKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseKeyError {
            kind: "QuestionKey".to_string(),
        };
        let (module, question) = s.split_once('-').ok_or_else(err)?;
        let module = module.parse::<u32>().map_err(|_| err())?;
        let question = question.parse::<u32>().map_err(|_| err())?;
        Ok(QuestionKey::new(ModuleId::new(module), question))
    }
}

// Question keys are map keys in persisted JSON, so they serialize as strings.

impl Serialize for QuestionKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for QuestionKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_display() {
        let id = UserId::new("guest_abc123");
        assert_eq!(id.to_string(), "guest_abc123");
        assert!(id.is_guest_id());
    }

    #[test]
    fn test_user_id_not_guest() {
        let id = UserId::new("f2b9c0de");
        assert!(!id.is_guest_id());
    }

    #[test]
    fn test_module_id_display() {
        let id = ModuleId::new(4);
        assert_eq!(id.to_string(), "4");
    }

    #[test]
    fn test_module_id_from_str() {
        let id: ModuleId = "7".parse().unwrap();
        assert_eq!(id, ModuleId::new(7));
    }

    #[test]
    fn test_module_id_from_str_invalid() {
        let result = "not-a-number".parse::<ModuleId>();
        assert!(result.is_err());
    }

    #[test]
    fn test_module_id_next() {
        assert_eq!(ModuleId::new(2).next(), ModuleId::new(3));
    }

    #[test]
    fn test_question_key_display() {
        let key = QuestionKey::new(ModuleId::new(3), 11);
        assert_eq!(key.to_string(), "3-11");
    }

    #[test]
    fn test_question_key_from_str() {
        let key: QuestionKey = "3-11".parse().unwrap();
        assert_eq!(key, QuestionKey::new(ModuleId::new(3), 11));
    }

    #[test]
    fn test_question_key_from_str_invalid() {
        assert!("3".parse::<QuestionKey>().is_err());
        assert!("3-x".parse::<QuestionKey>().is_err());
        assert!("-1-2".parse::<QuestionKey>().is_err());
    }

    #[test]
    fn test_question_key_roundtrip() {
        let original = QuestionKey::new(ModuleId::new(9), 0);
        let serialized = original.to_string();
        let deserialized: QuestionKey = serialized.parse().unwrap();
        assert_eq!(original, deserialized);
    }

    #[test]
    fn test_question_key_serde_as_string() {
        let key = QuestionKey::new(ModuleId::new(2), 5);
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"2-5\"");
        let back: QuestionKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }

    #[test]
    fn test_achievement_id_from_str() {
        let id: AchievementId = "12".parse().unwrap();
        assert_eq!(id, AchievementId::new(12));
    }
}
