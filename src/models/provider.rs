use serde::Serialize;

/// How a provider proves that a checkpoint was completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofKind {
    /// The provider calls our webhook with the session id.
    Callback,
    /// The provider redirects the browser back carrying a one-time secret.
    Secret,
}

/// The closed set of supported link providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    WorkInk,
    Linkvertise,
    LootLabs,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::WorkInk, Provider::Linkvertise, Provider::LootLabs];

    /// Parses the value clients send in `provider`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "workink" | "work.ink" => Some(Provider::WorkInk),
            "linkvertise" => Some(Provider::Linkvertise),
            "lootlabs" | "lootlink" => Some(Provider::LootLabs),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::WorkInk => "workink",
            Provider::Linkvertise => "linkvertise",
            Provider::LootLabs => "lootlabs",
        }
    }

    /// Short code embedded in minted key strings.
    pub fn tag(self) -> &'static str {
        match self {
            Provider::WorkInk => "WK",
            Provider::Linkvertise => "LV",
            Provider::LootLabs => "LL",
        }
    }

    pub fn proof_kind(self) -> ProofKind {
        match self {
            Provider::WorkInk => ProofKind::Callback,
            Provider::Linkvertise | Provider::LootLabs => ProofKind::Secret,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
