use super::Error;

pub struct Settings {
    /// Namespace prefixed to generated type names (eg. `ILProxy.Generated`)
    pub proxy_namespace: String,

    /// Suffix appended to the target's short name (eg. `Proxy` gives `ServiceProxy_0`)
    pub type_suffix: String,

    /// Field holding the interceptor pipeline on every generated type
    pub pipeline_field_name: String,

    /// Field holding the wrapped instance on interface proxies
    pub target_field_name: String,

    /// Number of independently locked shards in the proxy type cache
    ///
    /// Must be a power of two greater than one.
    pub cache_shard_amount: usize,
}

impl Settings {
    pub const DEFAULT_SHARD_AMOUNT: usize = 16;

    pub fn new() -> Settings {
        Settings {
            proxy_namespace: String::from("ILProxy.Generated"),
            type_suffix: String::from("Proxy"),
            pipeline_field_name: String::from("__interceptors"),
            target_field_name: String::from("__target"),
            cache_shard_amount: Self::DEFAULT_SHARD_AMOUNT,
        }
    }

    /// Check that generated types will be well formed and the cache can be created
    pub fn validate(&self) -> Result<(), Error> {
        fn check_name(what: &str, name: &str) -> Result<(), Error> {
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                Err(Error::InvalidSettings(format!(
                    "{} must be non-empty with no whitespace (got {:?})",
                    what, name
                )))
            } else {
                Ok(())
            }
        }

        check_name("proxy namespace", &self.proxy_namespace)?;
        check_name("pipeline field name", &self.pipeline_field_name)?;
        check_name("target field name", &self.target_field_name)?;
        if self.type_suffix.chars().any(char::is_whitespace) {
            return Err(Error::InvalidSettings(format!(
                "type suffix cannot contain whitespace (got {:?})",
                self.type_suffix
            )));
        }
        if self.pipeline_field_name == self.target_field_name {
            return Err(Error::InvalidSettings(String::from(
                "pipeline and target fields need different names",
            )));
        }
        if self.cache_shard_amount < 2 || !self.cache_shard_amount.is_power_of_two() {
            return Err(Error::InvalidSettings(format!(
                "cache shard amount must be a power of two greater than one (got {})",
                self.cache_shard_amount
            )));
        }
        Ok(())
    }
}

impl Default for Settings {
    fn default() -> Settings {
        Settings::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::new().validate().is_ok());
    }

    #[test]
    fn rejects_bad_settings() {
        let mut settings = Settings::new();
        settings.cache_shard_amount = 12;
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));

        let mut settings = Settings::new();
        settings.target_field_name = settings.pipeline_field_name.clone();
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));

        let mut settings = Settings::new();
        settings.proxy_namespace = String::from("has space");
        assert!(matches!(settings.validate(), Err(Error::InvalidSettings(_))));
    }
}
