use std::fmt;

use crate::error::MiddlewareError;

/// Host used when the binding is given as a bare port.
pub const DEFAULT_BIND_HOST: &str = "tcp://127.0.0.1";

/// Transport endpoint fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindAddress(String);

impl BindAddress {
    /// Resolves the configured binding into an endpoint.
    ///
    /// A bare port binds on [`DEFAULT_BIND_HOST`], `host:port` gets a `tcp://`
    /// scheme, and anything with a scheme is used as given.
    pub fn parse(binding: Option<&str>) -> Result<Self, MiddlewareError> {
        let binding = binding.map(str::trim).unwrap_or_default();
        if binding.is_empty() {
            return Err(MiddlewareError::Configuration(
                "binding must be provided".to_string(),
            ));
        }

        if binding.bytes().all(|b| b.is_ascii_digit()) {
            let port: u16 = binding.parse().map_err(|_| {
                MiddlewareError::Configuration(format!("binding port out of range: {binding}"))
            })?;
            return Ok(Self(format!("{DEFAULT_BIND_HOST}:{port}")));
        }

        if binding.contains("://") {
            return Ok(Self(binding.to_string()));
        }

        Ok(Self(format!("tcp://{binding}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::BindAddress;
    use crate::error::MiddlewareError;

    #[test]
    fn missing_or_blank_binding_is_a_configuration_error() {
        for binding in [None, Some(""), Some("   ")] {
            let err = BindAddress::parse(binding).expect_err("must fail");
            assert!(matches!(err, MiddlewareError::Configuration(_)));
        }
    }

    #[test]
    fn bare_port_binds_on_loopback() {
        let addr = BindAddress::parse(Some("5555")).expect("port");
        assert_eq!(addr.as_str(), "tcp://127.0.0.1:5555");
        assert_eq!(addr.to_string(), "tcp://127.0.0.1:5555");
    }

    #[test]
    fn out_of_range_port_is_rejected() {
        let err = BindAddress::parse(Some("70000")).expect_err("too large");
        assert!(matches!(err, MiddlewareError::Configuration(_)));
    }

    #[test]
    fn endpoints_with_and_without_scheme() {
        assert_eq!(
            BindAddress::parse(Some("tcp://*:6000")).expect("scheme").as_str(),
            "tcp://*:6000"
        );
        assert_eq!(
            BindAddress::parse(Some(" 0.0.0.0:6000 ")).expect("host:port").as_str(),
            "tcp://0.0.0.0:6000"
        );
    }
}
