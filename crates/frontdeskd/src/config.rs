use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Default cosine-distance tolerance for a positive match.
pub const DEFAULT_MATCH_TOLERANCE: f32 = 0.45;

/// Where the face store lives between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePolicy {
    /// JSON file, rewritten on every mutation.
    File,
    /// Process memory only; lost on restart.
    Memory,
}

impl StorePolicy {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "file" | "disk" => Some(Self::File),
            "memory" | "mem" => Some(Self::Memory),
            _ => None,
        }
    }
}

impl fmt::Display for StorePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::File => "file",
            Self::Memory => "memory",
        })
    }
}

/// How recognition requests are answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognitionMode {
    /// Encode with the ONNX oracle and scan the store.
    Oracle,
    /// No oracle: always answer with the most recent record. Not real recognition.
    Placeholder,
}

impl RecognitionMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "oracle" | "onnx" => Some(Self::Oracle),
            "placeholder" | "none" => Some(Self::Placeholder),
            _ => None,
        }
    }
}

impl fmt::Display for RecognitionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Oracle => "oracle",
            Self::Placeholder => "placeholder",
        })
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 127.0.0.1:5000).
    pub bind: SocketAddr,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Store persistence policy.
    pub store: StorePolicy,
    /// Path to the JSON face store (file policy only).
    pub store_path: PathBuf,
    /// Directory that receives uploaded visitor photos.
    pub images_dir: PathBuf,
    /// Oracle distance at or below which two faces match.
    pub match_tolerance: f32,
    pub recognition: RecognitionMode,
    /// Maximum accepted request body, in bytes.
    pub max_body_bytes: usize,
}

impl Config {
    /// Load configuration from `FRONTDESK_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("FRONTDESK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());

        let model_dir = std::env::var("FRONTDESK_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| frontdesk_core::default_model_dir());

        let store_path = std::env::var("FRONTDESK_STORE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("face_db.json"));

        let images_dir = std::env::var("FRONTDESK_IMAGES_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("images"));

        Self {
            bind: env_parse("FRONTDESK_BIND", SocketAddr::from(([127, 0, 0, 1], 5000))),
            model_dir,
            store: env_with("FRONTDESK_STORE", StorePolicy::parse, StorePolicy::File),
            store_path,
            images_dir,
            match_tolerance: env_parse("FRONTDESK_MATCH_TOLERANCE", DEFAULT_MATCH_TOLERANCE),
            recognition: env_with(
                "FRONTDESK_RECOGNITION",
                RecognitionMode::parse,
                RecognitionMode::Oracle,
            ),
            max_body_bytes: env_parse("FRONTDESK_MAX_BODY_BYTES", 16 * 1024 * 1024),
        }
    }
}

fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("frontdesk")
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_with(key, |v| v.trim().parse().ok(), default)
}

fn env_with<T>(key: &str, parse: impl Fn(&str) -> Option<T>, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => parse(&raw).unwrap_or_else(|| {
            tracing::warn!(key, value = %raw, "ignoring unparseable setting, using default");
            default
        }),
        Err(_) => default,
    }
}
