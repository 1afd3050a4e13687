use thiserror::Error;

/// Library error type.
///
/// Errors are delivered both as return values and through result callbacks,
/// so the type is `Clone` and carries only the transport's error text.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HalError {
    /// The bus connection could not be established or used. Fatal to `init`.
    #[error("D-Bus connection error: {0}")]
    Connection(String),
    /// Subscribing to object-manager signals failed. Discovery does not run
    /// for the current service-up cycle.
    #[error("signal subscription failed: {0}")]
    Subscription(String),
    /// A method call failed or the remote side answered with an error.
    #[error("remote call failed: {}{message}", error_name_prefix(.name))]
    RemoteCall {
        /// D-Bus error name, e.g. `org.bluez.Error.Failed`
        name: Option<String>,
        message: String,
    },
    #[error("HAL not initialized or D-Bus connection lost")]
    NotInitialized,
    #[error("invalid parameters: {0}")]
    InvalidParams(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// The operation was still in flight when the HAL was deinitialized.
    #[error("operation aborted by deinitialization")]
    Aborted,
}

fn error_name_prefix(name: &Option<String>) -> String {
    name.as_ref().map(|n| format!("{n}: ")).unwrap_or_default()
}

impl HalError {
    pub fn remote(message: impl Into<String>) -> Self {
        HalError::RemoteCall {
            name: None,
            message: message.into(),
        }
    }
}

impl From<zbus::Error> for HalError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, description, _) => HalError::RemoteCall {
                message: description.unwrap_or_else(|| name.to_string()),
                name: Some(name.to_string()),
            },
            other => HalError::remote(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_call_display() {
        let err = HalError::RemoteCall {
            name: Some("org.bluez.Error.Busy".to_string()),
            message: "Operation already in progress".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "remote call failed: org.bluez.Error.Busy: Operation already in progress"
        );

        let err = HalError::remote("timed out");
        assert_eq!(err.to_string(), "remote call failed: timed out");
    }

    #[test]
    fn test_zbus_error_conversion() {
        let err: HalError = zbus::Error::Failure("socket closed".to_string()).into();
        assert!(matches!(err, HalError::RemoteCall { name: None, .. }));
    }
}
