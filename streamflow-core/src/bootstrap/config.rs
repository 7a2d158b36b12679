//! Configuration loading

use std::path::Path;

use crate::{Config, Error, Result};

/// Load configuration from config file or environment variables
///
/// Config file search order:
/// 1. `explicit` path (from the command line)
/// 2. `STREAMFLOW_CONFIG_PATH` environment variable
/// 3. ./config.yaml (current working directory)
/// 4. /config/config.yaml (container mount path)
/// 5. Fall back to environment variables only
///
/// Logging is not initialised yet when this runs, so progress goes to stderr.
pub fn load_config(explicit: Option<&str>) -> Result<Config> {
    let config_path = discover_config_path(explicit);

    let config = if let Some(path) = config_path {
        eprintln!("Loading config from {path}");
        Config::from_file(&path)?
    } else {
        eprintln!("No config file found, using environment variables");
        Config::from_env()?
    };

    config.validate().map_err(Error::InvalidConfig)?;

    Ok(config)
}

fn discover_config_path(explicit: Option<&str>) -> Option<String> {
    explicit
        .map(str::to_string)
        .filter(|p| Path::new(p).exists())
        .or_else(|| {
            std::env::var("STREAMFLOW_CONFIG_PATH")
                .ok()
                .filter(|p| Path::new(p).exists())
        })
        .or_else(|| {
            ["config.yaml", "/config/config.yaml"]
                .into_iter()
                .find(|p| Path::new(p).exists())
                .map(str::to_string)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_explicit_path_wins() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        let path = file.path().to_str().unwrap().to_string();
        assert_eq!(discover_config_path(Some(&path)), Some(path));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "relay:\n  max_redirects: 42").unwrap();

        let err = load_config(file.path().to_str()).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(ref errors) if errors.len() == 1));
    }
}
