//! # Recognition Engine Catalog
//!
//! Static knowledge about each speech provider: identity, confidence
//! prior, language coverage, and which credentials unlock it. The broker
//! consults this catalog; nothing here performs I/O.

use serde::{Deserialize, Serialize};

/// Supported speech recognition providers, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Engine {
    GoogleFree,
    GoogleCloud,
    WitAi,
    Azure,
}

/// Order engines are attempted in. Free first, then the paid providers.
pub const ENGINE_PRIORITY: [Engine; 4] = [
    Engine::GoogleFree,
    Engine::GoogleCloud,
    Engine::WitAi,
    Engine::Azure,
];

// Wit.ai only covers a narrow language set compared to the other engines.
const WIT_AI_LANGUAGES: &[&str] = &[
    "en-US", "en-GB", "id-ID", "es-ES", "fr-FR", "de-DE", "it-IT", "pt-BR", "nl-NL", "ja-JP",
    "ko-KR", "zh-CN", "ar-SA", "hi-IN", "ru-RU", "tr-TR",
];

impl Engine {
    pub fn id(&self) -> &'static str {
        match self {
            Engine::GoogleFree => "google_free",
            Engine::GoogleCloud => "google_cloud",
            Engine::WitAi => "wit_ai",
            Engine::Azure => "azure",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Engine::GoogleFree => "Google Speech (free tier)",
            Engine::GoogleCloud => "Google Cloud Speech-to-Text",
            Engine::WitAi => "Wit.ai",
            Engine::Azure => "Azure Speech Services",
        }
    }

    /// Baseline confidence assigned when a provider returns text without
    /// its own confidence figure. Also the sort key for result selection.
    pub fn confidence_prior(&self) -> f64 {
        match self {
            Engine::GoogleFree => 0.80,
            Engine::GoogleCloud => 0.90,
            Engine::WitAi => 0.85,
            Engine::Azure => 0.90,
        }
    }

    pub fn supports_language(&self, tag: &str) -> bool {
        match self {
            // Google and Azure cover everything the service accepts
            Engine::GoogleFree | Engine::GoogleCloud | Engine::Azure => true,
            Engine::WitAi => WIT_AI_LANGUAGES.contains(&tag),
        }
    }

    /// Whether the credentials on hand are enough to call this engine.
    pub fn is_configured(&self, creds: &EngineCredentials) -> bool {
        match self {
            Engine::GoogleFree => true,
            Engine::GoogleCloud => creds.google_cloud_api_key.is_some(),
            Engine::WitAi => creds.wit_ai_key.is_some(),
            Engine::Azure => creds.azure_key.is_some() && creds.azure_region.is_some(),
        }
    }
}

impl std::fmt::Display for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Provider credentials sourced from the environment at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineCredentials {
    pub google_cloud_api_key: Option<String>,
    pub wit_ai_key: Option<String>,
    pub azure_key: Option<String>,
    pub azure_region: Option<String>,
}

impl EngineCredentials {
    pub fn from_env() -> Self {
        Self {
            google_cloud_api_key: non_empty_env("GOOGLE_CLOUD_SPEECH_CREDENTIALS"),
            wit_ai_key: non_empty_env("WIT_AI_KEY"),
            azure_key: non_empty_env("AZURE_SPEECH_KEY"),
            azure_region: non_empty_env("AZURE_SPEECH_REGION"),
        }
    }

    /// Engines usable right now, in priority order. GoogleFree needs no
    /// credentials so this is never empty.
    pub fn configured_engines(&self) -> Vec<Engine> {
        ENGINE_PRIORITY
            .iter()
            .copied()
            .filter(|e| e.is_configured(self))
            .collect()
    }

    /// Engines usable for a given language.
    pub fn engines_for_language(&self, tag: &str) -> Vec<Engine> {
        self.configured_engines()
            .into_iter()
            .filter(|e| e.supports_language(tag))
            .collect()
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_google_free_is_always_configured() {
        let creds = EngineCredentials::default();
        let engines = creds.configured_engines();
        assert_eq!(engines, vec![Engine::GoogleFree]);
    }

    #[test]
    fn test_azure_needs_key_and_region() {
        let mut creds = EngineCredentials {
            azure_key: Some("k".to_string()),
            ..Default::default()
        };
        assert!(!Engine::Azure.is_configured(&creds));
        creds.azure_region = Some("southeastasia".to_string());
        assert!(Engine::Azure.is_configured(&creds));
    }

    #[test]
    fn test_priority_order_preserved() {
        let creds = EngineCredentials {
            google_cloud_api_key: Some("g".to_string()),
            wit_ai_key: Some("w".to_string()),
            azure_key: Some("a".to_string()),
            azure_region: Some("r".to_string()),
            ..Default::default()
        };
        assert_eq!(creds.configured_engines(), ENGINE_PRIORITY.to_vec());
    }

    #[test]
    fn test_language_filter_excludes_wit_ai() {
        let creds = EngineCredentials {
            wit_ai_key: Some("w".to_string()),
            ..Default::default()
        };
        assert_eq!(
            creds.engines_for_language("jv-ID"),
            vec![Engine::GoogleFree]
        );
        assert_eq!(
            creds.engines_for_language("id-ID"),
            vec![Engine::GoogleFree, Engine::WitAi]
        );
    }

    #[test]
    fn test_engine_serializes_snake_case() {
        let json = serde_json::to_string(&Engine::GoogleFree).unwrap();
        assert_eq!(json, "\"google_free\"");
    }
}
