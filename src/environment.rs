use strum::{Display, EnumString};

/// Deployment environment, selecting `config/{environment}.toml`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, EnumString, Display)]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

#[cfg(test)]
mod tests {
    use std::str::FromStr as _;

    use super::*;

    #[test]
    fn test_parse_and_config_file_name() {
        assert_eq!(
            Environment::from_str("PRODUCTION").unwrap(),
            Environment::Production
        );
        assert_eq!(format!("config/{}", Environment::Test), "config/test");
        assert!(Environment::from_str("staging").is_err());
    }
}
