use std::path::PathBuf;
use std::time::Duration;

pub const DB_FILE_NAME: &str = "archimate_models.sqlite";
pub const DEFAULT_MUTATION_TTL: Duration = Duration::from_secs(300);

/// Runtime settings for the model store and the server session.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub db_path: PathBuf,
    /// How long a recorded mutation stays "recent" in a session.
    pub mutation_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: data_dir().join(DB_FILE_NAME),
            mutation_ttl: DEFAULT_MUTATION_TTL,
        }
    }
}

impl Config {
    /// Defaults overridden by `ARCHI_DB_PATH`, `ARCHI_DATA_DIR` and
    /// `ARCHI_MUTATION_TTL_SECS`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_path = match non_empty("ARCHI_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => non_empty("ARCHI_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(data_dir)
                .join(DB_FILE_NAME),
        };
        let mutation_ttl = non_empty("ARCHI_MUTATION_TTL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_MUTATION_TTL);

        Self { db_path, mutation_ttl }
    }
}

/// Resolve the global data directory (~/.archi/).
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".archi")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn explicit_db_path_wins() {
        let cfg = Config::from_lookup(lookup(&[
            ("ARCHI_DB_PATH", "/tmp/models.db"),
            ("ARCHI_DATA_DIR", "/srv/archi"),
        ]));
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/models.db"));
    }

    #[test]
    fn data_dir_override() {
        let cfg = Config::from_lookup(lookup(&[("ARCHI_DATA_DIR", "/srv/archi")]));
        assert_eq!(cfg.db_path, PathBuf::from("/srv/archi").join(DB_FILE_NAME));
        assert_eq!(cfg.mutation_ttl, DEFAULT_MUTATION_TTL);
    }

    #[test]
    fn ttl_parses_or_falls_back() {
        let cfg = Config::from_lookup(lookup(&[("ARCHI_MUTATION_TTL_SECS", "30")]));
        assert_eq!(cfg.mutation_ttl, Duration::from_secs(30));
        let cfg = Config::from_lookup(lookup(&[("ARCHI_MUTATION_TTL_SECS", "soon")]));
        assert_eq!(cfg.mutation_ttl, DEFAULT_MUTATION_TTL);
    }
}
