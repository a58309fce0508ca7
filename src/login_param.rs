//! Login parameters: the resolved IMAP/SMTP endpoint a
//! `CONFIGURE_IMAP` job tests and persists.

use crate::config::{Config, ServerFlags};
use crate::context::Context;

#[derive(Debug, Clone)]
pub struct ServerParam {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct LoginParam {
    pub addr: String,
    pub imap: ServerParam,
    pub smtp: ServerParam,
    pub server_flags: ServerFlags,
}

impl LoginParam {
    /// Reads the candidate (not-yet-confirmed) `mail_*`/`send_*` keys, the
    /// ones a `CONFIGURE_IMAP` job connect-tests before promoting them to
    /// `configured_*`.
    pub async fn from_candidate_config(context: &Context) -> Self {
        Self::from_prefix(context, false).await
    }

    /// Reads the already-confirmed `configured_*` keys that the IMAP/SMTP
    /// adapters actually connect with day to day.
    pub async fn from_configured(context: &Context) -> Self {
        Self::from_prefix(context, true).await
    }

    async fn from_prefix(context: &Context, configured: bool) -> Self {
        let get = |key: Config| {
            let context = context;
            async move { context.get_config(key).await.unwrap_or_default() }
        };
        if configured {
            LoginParam {
                addr: get(Config::ConfiguredAddr).await,
                imap: ServerParam {
                    server: get(Config::ConfiguredMailServer).await,
                    port: get(Config::ConfiguredMailPort).await.parse().unwrap_or(0),
                    user: get(Config::ConfiguredMailUser).await,
                    password: get(Config::ConfiguredMailPw).await,
                },
                smtp: ServerParam {
                    server: get(Config::ConfiguredSendServer).await,
                    port: get(Config::ConfiguredSendPort).await.parse().unwrap_or(0),
                    user: get(Config::ConfiguredSendUser).await,
                    password: get(Config::ConfiguredSendPw).await,
                },
                server_flags: ServerFlags(
                    get(Config::ConfiguredServerFlags).await.parse().unwrap_or(0),
                ),
            }
        } else {
            LoginParam {
                addr: get(Config::Addr).await,
                imap: ServerParam {
                    server: get(Config::MailServer).await,
                    port: get(Config::MailPort).await.parse().unwrap_or(0),
                    user: get(Config::MailUser).await,
                    password: get(Config::MailPw).await,
                },
                smtp: ServerParam {
                    server: get(Config::SendServer).await,
                    port: get(Config::SendPort).await.parse().unwrap_or(0),
                    user: get(Config::SendUser).await,
                    password: get(Config::SendPw).await,
                },
                server_flags: ServerFlags(get(Config::ServerFlags).await.parse().unwrap_or(0)),
            }
        }
    }

    /// Persists `self` as the confirmed `configured_*` keys, on
    /// successful `CONFIGURE_IMAP` completion.
    pub async fn save_as_configured(&self, context: &Context) -> anyhow::Result<()> {
        context.set_config(Config::Configured, Some("1")).await?;
        context.set_config(Config::ConfiguredAddr, Some(&self.addr)).await?;
        context.set_config(Config::ConfiguredMailServer, Some(&self.imap.server)).await?;
        context.set_config(Config::ConfiguredMailPort, Some(&self.imap.port.to_string())).await?;
        context.set_config(Config::ConfiguredMailUser, Some(&self.imap.user)).await?;
        context.set_config(Config::ConfiguredMailPw, Some(&self.imap.password)).await?;
        context.set_config(Config::ConfiguredSendServer, Some(&self.smtp.server)).await?;
        context.set_config(Config::ConfiguredSendPort, Some(&self.smtp.port.to_string())).await?;
        context.set_config(Config::ConfiguredSendUser, Some(&self.smtp.user)).await?;
        context.set_config(Config::ConfiguredSendPw, Some(&self.smtp.password)).await?;
        context
            .set_config(Config::ConfiguredServerFlags, Some(&self.server_flags.0.to_string()))
            .await?;
        Ok(())
    }

    /// Fills missing host/port/user fields from the address domain
    ///, applying the Gmail special case.
    pub fn fill_defaults(&mut self) {
        let Some((_, domain)) = self.addr.split_once('@') else {
            return;
        };
        let is_gmail = matches!(domain.to_ascii_lowercase().as_str(), "gmail.com" | "googlemail.com");
        if is_gmail {
            self.server_flags.0 |= ServerFlags::AUTH_OAUTH2 | ServerFlags::NO_EXTRA_IMAP_UPLOAD | ServerFlags::NO_MOVE_TO_CHATS;
        }

        if self.imap.server.is_empty() {
            self.imap.server = format!("imap.{domain}");
        }
        if self.imap.user.is_empty() {
            self.imap.user = self.addr.clone();
        }
        if self.imap.port == 0 {
            self.imap.port = if self.server_flags.has(ServerFlags::IMAP_SOCKET_STARTTLS)
                || self.server_flags.has(ServerFlags::IMAP_SOCKET_PLAIN)
            {
                143
            } else {
                993
            };
        }

        if self.smtp.server.is_empty() {
            self.smtp.server = format!("smtp.{domain}");
        }
        if self.smtp.user.is_empty() {
            self.smtp.user = self.addr.clone();
        }
        if self.smtp.password.is_empty() {
            self.smtp.password = self.imap.password.clone();
        }
        if self.smtp.port == 0 {
            self.smtp.port = if self.server_flags.has(ServerFlags::SMTP_SOCKET_STARTTLS) {
                587
            } else if self.server_flags.has(ServerFlags::SMTP_SOCKET_PLAIN) {
                25
            } else {
                465
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare(addr: &str) -> LoginParam {
        LoginParam {
            addr: addr.to_string(),
            imap: ServerParam {
                server: String::new(),
                port: 0,
                user: String::new(),
                password: "secret".into(),
            },
            smtp: ServerParam {
                server: String::new(),
                port: 0,
                user: String::new(),
                password: String::new(),
            },
            server_flags: ServerFlags(0),
        }
    }

    #[test]
    fn fills_default_host_and_ssl_ports() {
        let mut p = bare("me@example.org");
        p.fill_defaults();
        assert_eq!(p.imap.server, "imap.example.org");
        assert_eq!(p.imap.port, 993);
        assert_eq!(p.smtp.server, "smtp.example.org");
        assert_eq!(p.smtp.port, 465);
        assert_eq!(p.smtp.user, "me@example.org");
        assert_eq!(p.smtp.password, "secret");
    }

    #[test]
    fn gmail_forces_the_special_case_flags() {
        let mut p = bare("me@gmail.com");
        p.fill_defaults();
        assert!(p.server_flags.has(ServerFlags::AUTH_OAUTH2));
        assert!(p.server_flags.has(ServerFlags::NO_EXTRA_IMAP_UPLOAD));
        assert!(p.server_flags.has(ServerFlags::NO_MOVE_TO_CHATS));
    }

    #[test]
    fn starttls_flag_selects_plaintext_default_ports() {
        let mut p = bare("me@example.org");
        p.server_flags.0 |= ServerFlags::IMAP_SOCKET_STARTTLS | ServerFlags::SMTP_SOCKET_STARTTLS;
        p.fill_defaults();
        assert_eq!(p.imap.port, 143);
        assert_eq!(p.smtp.port, 587);
    }
}
