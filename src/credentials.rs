use dialoguer::Password;
use tracing::debug;

use crate::config::Config;
use crate::error::CredentialError;

/// Source of the router password when the config does not carry one.
pub trait CredentialProvider {
    fn password(&self, username: &str) -> Result<String, CredentialError>;
}

/// Prompts on the controlling terminal without echo.
pub struct TerminalPrompt;

impl CredentialProvider for TerminalPrompt {
    fn password(&self, username: &str) -> Result<String, CredentialError> {
        // dialoguer refuses to prompt when stderr is not a terminal
        Password::new()
            .with_prompt(format!("Password for {username}"))
            .allow_empty_password(false)
            .interact()
            .map_err(|err| CredentialError::NoTerminal(std::io::Error::other(err)))
    }
}

/// Returns the configured password, falling back to `provider`.
pub fn resolve(config: &Config, provider: &impl CredentialProvider) -> Result<String, CredentialError> {
    if let Some(password) = &config.password {
        debug!("using password from config");
        return Ok(password.clone());
    }

    let password = provider.password(&config.username)?;
    if password.is_empty() {
        return Err(CredentialError::Empty);
    }
    Ok(password)
}

/// Fixed answer, for tests.
#[cfg(test)]
pub struct Fixed(pub &'static str);

#[cfg(test)]
impl CredentialProvider for Fixed {
    fn password(&self, _username: &str) -> Result<String, CredentialError> {
        Ok(self.0.to_string())
    }
}

/// Fails like a run without a terminal.
#[cfg(test)]
pub struct NoTerminal;

#[cfg(test)]
impl CredentialProvider for NoTerminal {
    fn password(&self, _username: &str) -> Result<String, CredentialError> {
        Err(CredentialError::NoTerminal(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "not a terminal",
        )))
    }
}

#[cfg(test)]
fn config_with(password: Option<&str>) -> Config {
    Config {
        host: "fritz.box".into(),
        port: 443,
        username: "admin".into(),
        password: password.map(str::to_string),
        devices: Default::default(),
    }
}

#[test]
fn test_configured_password_wins() {
    let password = resolve(&config_with(Some("from-file")), &Fixed("typed")).unwrap();
    assert_eq!(password, "from-file");
}

#[test]
fn test_prompt_when_not_configured() {
    let password = resolve(&config_with(None), &Fixed("typed")).unwrap();
    assert_eq!(password, "typed");
}

#[test]
fn test_no_terminal_and_no_password() {
    assert!(matches!(
        resolve(&config_with(None), &NoTerminal),
        Err(CredentialError::NoTerminal(_))
    ));
}

#[test]
fn test_empty_answer_is_rejected() {
    assert!(matches!(
        resolve(&config_with(None), &Fixed("")),
        Err(CredentialError::Empty)
    ));
}
