use std::fmt;

use anyhow::Result;
use tracing::warn;

/// Local developer instance, Windows authentication, no TLS.
pub const LOCAL_DB: &str = r"Server=(localdb)\MSSQLLocalDB;Integrated Security=true;Encrypt=false";
/// Default SQL Express instance, Windows authentication, no TLS.
pub const SQL_EXPRESS: &str = r"Server=.\SQLEXPRESS;Integrated Security=true;Encrypt=false";

const ALIASES: &[(&str, &str)] = &[("LOCAL", LOCAL_DB), ("EXPRESS", SQL_EXPRESS)];

/// Expand a `/C` value: known aliases map to their fixed connection
/// strings, anything else is returned untouched.
pub fn expand_alias(value: &str) -> String {
    let upper = value.trim().to_uppercase();
    ALIASES
        .iter()
        .find(|(alias, _)| *alias == upper)
        .map(|(_, full)| full.to_string())
        .unwrap_or_else(|| value.to_string())
}

/// The parts of an ADO-style connection string that `sqlcmd` understands.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub server: Option<String>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub trusted: bool,
    pub encrypt: Option<bool>,
    pub trust_server_certificate: bool,
    pub login_timeout: Option<u32>,
}

impl fmt::Debug for ConnectionSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSettings")
            .field("server", &self.server)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("trusted", &self.trusted)
            .field("encrypt", &self.encrypt)
            .field("trust_server_certificate", &self.trust_server_certificate)
            .field("login_timeout", &self.login_timeout)
            .finish()
    }
}

impl ConnectionSettings {
    pub fn parse(connection_string: &str) -> Result<Self> {
        let mut settings = ConnectionSettings::default();
        for part in split_pairs(connection_string) {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let Some((key, value)) = part.split_once('=') else {
                anyhow::bail!("Malformed connection string segment '{}'", part);
            };
            let value = unquote(value.trim());
            match key.trim().to_lowercase().as_str() {
                "server" | "data source" | "address" | "addr" | "network address" => {
                    settings.server = Some(value)
                }
                "database" | "initial catalog" => settings.database = Some(value),
                "user id" | "uid" | "user" => settings.user = Some(value),
                "password" | "pwd" => settings.password = Some(value),
                "integrated security" | "trusted_connection" => {
                    settings.trusted = is_truthy(&value) || value.eq_ignore_ascii_case("sspi")
                }
                "encrypt" => {
                    let mandatory = value.eq_ignore_ascii_case("mandatory");
                    settings.encrypt = Some(is_truthy(&value) || mandatory)
                }
                "trustservercertificate" | "trust server certificate" => {
                    settings.trust_server_certificate = is_truthy(&value)
                }
                "connect timeout" | "connection timeout" | "timeout" => {
                    let secs = value
                        .parse::<u32>()
                        .map_err(|_| anyhow::anyhow!("Invalid connection timeout '{}'", value))?;
                    settings.login_timeout = Some(secs);
                }
                other => warn!(key = other, "ignoring unsupported connection string key"),
            }
        }
        if settings.server.is_none() {
            anyhow::bail!("Connection string does not name a server");
        }
        Ok(settings)
    }

    /// SQL authentication without a password in the string.
    pub fn needs_password(&self) -> bool {
        !self.trusted && self.user.is_some() && self.password.is_none()
    }

    /// Login arguments for `sqlcmd`. The password is never part of them;
    /// it travels through `SQLCMDPASSWORD`.
    pub fn sqlcmd_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(server) = &self.server {
            args.extend(["-S".to_string(), server.clone()]);
        }
        if let Some(database) = &self.database {
            args.extend(["-d".to_string(), database.clone()]);
        }
        match (&self.user, self.trusted) {
            (Some(user), false) => args.extend(["-U".to_string(), user.clone()]),
            _ => args.push("-E".to_string()),
        }
        // mssql-tools18 encrypts unless told the encryption is optional
        match self.encrypt {
            Some(true) => args.push("-N".to_string()),
            Some(false) => args.push("-No".to_string()),
            None => {}
        }
        if self.trust_server_certificate {
            args.push("-C".to_string());
        }
        if let Some(secs) = self.login_timeout {
            args.extend(["-l".to_string(), secs.to_string()]);
        }
        args
    }
}

/// Split on `;` outside of double quotes and braces. Doubled quotes and
/// doubled closing braces are escapes; they stay in place for [`unquote`].
fn split_pairs(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_braces = false;
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push(c);
                chars.next();
            }
            '}' if in_braces && chars.peek() == Some(&'}') => {
                current.push(c);
                chars.next();
            }
            '"' if !in_braces => in_quotes = !in_quotes,
            '{' if !in_quotes => in_braces = true,
            '}' if !in_quotes => in_braces = false,
            ';' if !in_quotes && !in_braces => {
                parts.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    parts.push(current);
    parts
}

fn unquote(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('"').and_then(|v| v.strip_suffix('"')) {
        return inner.replace("\"\"", "\"");
    }
    if let Some(inner) = value.strip_prefix('{').and_then(|v| v.strip_suffix('}')) {
        return inner.replace("}}", "}");
    }
    value.to_string()
}

fn is_truthy(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "yes" | "1")
}
