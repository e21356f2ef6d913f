//! AI providers, model selectors and output languages.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External AI command-line tools the pipeline can drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    #[default]
    Gemini,
    Claude,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Gemini, Provider::Claude];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
        }
    }

    /// Executable looked up on `PATH`.
    pub fn command_name(&self) -> &'static str {
        match self {
            Provider::Gemini => "gemini",
            Provider::Claude => "claude",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Gemini => "Gemini",
            Provider::Claude => "Claude",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "claude" => Ok(Provider::Claude),
            other => Err(format!("unknown provider: {}", other)),
        }
    }
}

/// Model selector passed to a provider. `auto` lets the CLI pick.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ModelName(pub String);

impl ModelName {
    pub const AUTO: &'static str = "auto";

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            Self::auto()
        } else {
            Self(trimmed.to_string())
        }
    }

    pub fn auto() -> Self {
        Self(Self::AUTO.to_string())
    }

    pub fn is_auto(&self) -> bool {
        self.0.eq_ignore_ascii_case(Self::AUTO)
    }

    /// Explicit model name, `None` when the provider should choose.
    pub fn explicit(&self) -> Option<&str> {
        if self.is_auto() {
            None
        } else {
            Some(&self.0)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ModelName {
    fn default() -> Self {
        Self::auto()
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ModelName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Output language requested from the AI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    Korean,
    #[default]
    English,
    Japanese,
    Chinese,
    /// No language instruction; the model decides.
    Auto,
}

impl Language {
    pub const ALL: [Language; 5] = [
        Language::Korean,
        Language::English,
        Language::Japanese,
        Language::Chinese,
        Language::Auto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Korean => "korean",
            Language::English => "english",
            Language::Japanese => "japanese",
            Language::Chinese => "chinese",
            Language::Auto => "auto",
        }
    }

    /// Sentence appended to the prompt.
    pub fn instruction(&self) -> &'static str {
        match self {
            Language::Korean => "답변은 한국어로 작성해주세요.",
            Language::English => "Please answer in English.",
            Language::Japanese => "日本語で回答してください。",
            Language::Chinese => "请用中文回答。",
            Language::Auto => "",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown language: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_parse() {
        assert_eq!("gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!(" Claude ".parse::<Provider>().unwrap(), Provider::Claude);
        assert!("openai".parse::<Provider>().is_err());
    }

    #[test]
    fn test_model_auto() {
        assert!(ModelName::auto().is_auto());
        assert!(ModelName::new("AUTO").is_auto());
        assert!(ModelName::new("  ").is_auto());
        assert_eq!(ModelName::new("gemini-2.5-pro").explicit(), Some("gemini-2.5-pro"));
        assert_eq!(ModelName::auto().explicit(), None);
    }

    #[test]
    fn test_language_parse_and_instruction() {
        assert_eq!("korean".parse::<Language>().unwrap(), Language::Korean);
        assert_eq!("English".parse::<Language>().unwrap(), Language::English);
        assert!("klingon".parse::<Language>().is_err());
        assert!(Language::Auto.instruction().is_empty());
        assert!(!Language::Japanese.instruction().is_empty());
    }
}
