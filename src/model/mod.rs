pub mod account;
pub mod api_key;
pub mod usage;

pub use account::*;
pub use api_key::*;
pub use usage::*;

/// Which upstream provider family a request targets. Coarser than
/// [`AccountKind`]: both Claude variants share one platform for the purpose
/// of an `ApiKey`'s `permissions` and binding-order resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    OpenAi,
    Gemini,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Claude => write!(f, "claude"),
            Platform::OpenAi => write!(f, "openai"),
            Platform::Gemini => write!(f, "gemini"),
        }
    }
}
