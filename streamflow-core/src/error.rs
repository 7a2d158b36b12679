use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = Error::InvalidConfig(vec!["a is wrong".to_string(), "b is wrong".to_string()]);
        assert_eq!(err.to_string(), "Invalid configuration: a is wrong; b is wrong");
    }
}
