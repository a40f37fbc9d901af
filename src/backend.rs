use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Environment variable that overrides backend detection.
pub const BACKEND_ENV: &str = "LAYERNORM_BACKEND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Sequential,
    Parallel,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Sequential => write!(f, "sequential"),
            Backend::Parallel => write!(f, "parallel"),
        }
    }
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" | "seq" | "serial" => Ok(Backend::Sequential),
            "parallel" | "par" | "rayon" => Ok(Backend::Parallel),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Picks the backend from `LAYERNORM_BACKEND`, otherwise from the size of
/// the rayon pool.
pub fn detect_backend() -> Backend {
    if let Ok(value) = std::env::var(BACKEND_ENV) {
        match value.parse::<Backend>() {
            Ok(backend) => return backend,
            Err(e) => log::warn!("ignoring {}: {}", BACKEND_ENV, e),
        }
    }

    if rayon::current_num_threads() > 1 {
        Backend::Parallel
    } else {
        Backend::Sequential
    }
}

pub static DEFAULT_BACKEND: Lazy<Backend> = Lazy::new(|| {
    let backend = detect_backend();
    log::info!("layer norm backend: {} ({} rayon threads)", backend, rayon::current_num_threads());
    backend
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_display() {
        assert_eq!(format!("{}", Backend::Sequential), "sequential");
        assert_eq!(format!("{}", Backend::Parallel), "parallel");
    }

    #[test]
    fn test_backend_from_str() {
        assert_eq!("Parallel".parse::<Backend>(), Ok(Backend::Parallel));
        assert_eq!(" seq ".parse::<Backend>(), Ok(Backend::Sequential));
        assert!("cuda".parse::<Backend>().is_err());
    }

    #[test]
    fn test_default_backend_resolves() {
        // Only checks that detection does not panic.
        let backend = *DEFAULT_BACKEND;
        println!("Detected backend: {}", backend);
    }
}
