use serde::{Deserialize, Serialize};

/// Upstream provider type as persisted on the provider row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Google,
    Anthropic,
    OAuth,
    Custom,
}

impl ProviderKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderKind::OpenAi),
            "google" => Some(ProviderKind::Google),
            "anthropic" => Some(ProviderKind::Anthropic),
            "oauth" => Some(ProviderKind::OAuth),
            "custom" => Some(ProviderKind::Custom),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::Google => "google",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::OAuth => "oauth",
            ProviderKind::Custom => "custom",
        }
    }

    /// Wire dialect spoken by the upstream. `openai`, `oauth`, and
    /// `custom` providers all take and return OpenAI-shaped payloads.
    pub fn family(self) -> ApiFamily {
        match self {
            ProviderKind::Google => ApiFamily::Google,
            ProviderKind::Anthropic => ApiFamily::Anthropic,
            ProviderKind::OpenAi | ProviderKind::OAuth | ProviderKind::Custom => {
                ApiFamily::OpenAiLike
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFamily {
    OpenAiLike,
    Google,
    Anthropic,
}

/// How the gateway authenticates to the upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    Bearer,
    Header,
    OAuth,
    None,
}

impl AuthKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "bearer" => Some(AuthKind::Bearer),
            "header" => Some(AuthKind::Header),
            "oauth" => Some(AuthKind::OAuth),
            "none" => Some(AuthKind::None),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AuthKind::Bearer => "bearer",
            AuthKind::Header => "header",
            AuthKind::OAuth => "oauth",
            AuthKind::None => "none",
        }
    }

    /// Static sealed credentials must be present for these kinds.
    pub fn needs_static_credentials(self) -> bool {
        matches!(self, AuthKind::Bearer | AuthKind::Header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parse_roundtrip() {
        for kind in [
            ProviderKind::OpenAi,
            ProviderKind::Google,
            ProviderKind::Anthropic,
            ProviderKind::OAuth,
            ProviderKind::Custom,
        ] {
            assert_eq!(ProviderKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ProviderKind::parse("azure"), None);
    }

    #[test]
    fn openai_like_family() {
        assert_eq!(ProviderKind::OAuth.family(), ApiFamily::OpenAiLike);
        assert_eq!(ProviderKind::Custom.family(), ApiFamily::OpenAiLike);
        assert_eq!(ProviderKind::Google.family(), ApiFamily::Google);
    }
}
