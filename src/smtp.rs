//! SMTP adapter: connect-test for `CONFIGURE_IMAP` and the
//! `SEND_MSG_TO_SMTP`/`SEND_MDN` job handlers.
//!
//! A thin wrapper that owns one `async-smtp`/`async-native-tls` session and
//! surfaces connect/login failures as `anyhow` errors.

use anyhow::{bail, Context as _, Result};

use crate::context::Context;
use crate::job::{Action, Job};
use crate::login_param::LoginParam;

/// Connect-tests `param`'s SMTP endpoint for the `CONFIGURE_IMAP` job
///: TCP connect, TLS handshake, EHLO/HELO, then auth.
/// Nothing is sent and the connection is dropped once login succeeds.
pub async fn connect_test(param: &LoginParam) -> Result<()> {
    let mut session = connect(param).await?;
    session.quit().await.context("smtp quit failed")?;
    Ok(())
}

async fn connect(param: &LoginParam) -> Result<async_smtp::SmtpTransport> {
    let tls = async_native_tls::TlsConnector::new();
    let tcp = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        tokio::net::TcpStream::connect((param.smtp.server.as_str(), param.smtp.port)),
    )
    .await
    .context("smtp connect timed out")?
    .context("smtp tcp connect failed")?;
    let tls_stream = tls
        .connect(param.smtp.server.as_str(), tcp)
        .await
        .context("smtp tls handshake failed")?;

    let creds = async_smtp::authentication::Credentials::new(
        param.smtp.user.clone(),
        param.smtp.password.clone(),
    );
    let client = async_smtp::SmtpClient::new().credentials(creds);
    let transport = client
        .into_transport(tls_stream)
        .connect()
        .await
        .context("smtp login failed")?;
    Ok(transport)
}

/// Executes one job dispatched by the scheduler for the SMTP thread
///: both `SEND_MSG_TO_SMTP` and `SEND_MDN` carry the
/// already-rendered RFC 5322 octets and recipient list in the job's
/// parameter bag, so both reduce to one envelope send.
pub async fn send_job(context: &Context, job: &Job) -> Result<()> {
    match job.action {
        Action::SendMsgToSmtp | Action::SendMdn => send_rendered(context, job).await,
        other => bail!("{other:?} is not an SMTP job"),
    }
}

async fn send_rendered(context: &Context, job: &Job) -> Result<()> {
    use crate::param::Key;

    let Some(rendered) = job.param.get(Key::File) else {
        bail!("smtp job {} has no rendered message attached", job.id);
    };
    let octets = crate::blob::BlobObject::from_name(rendered).read(context.blobdir())?;
    let recipients: Vec<&str> = job
        .param
        .get(Key::Recipients)
        .map(|v| v.split('\u{1e}').collect())
        .unwrap_or_default();
    if recipients.is_empty() {
        bail!("smtp job {} has no recipients", job.id);
    }

    let param = LoginParam::from_configured(context).await;
    let mut session = connect(&param).await?;

    let from = async_smtp::EmailAddress::new(param.addr.clone())
        .map_err(|_| anyhow::anyhow!("invalid from address {}", param.addr))?;
    let to = recipients
        .iter()
        .filter_map(|addr| async_smtp::EmailAddress::new(addr.to_string()).ok())
        .collect::<Vec<_>>();
    if to.is_empty() {
        bail!("smtp job {} has no valid recipients", job.id);
    }
    let envelope =
        async_smtp::Envelope::new(Some(from), to).context("invalid smtp envelope")?;
    session
        .send(envelope, &octets)
        .await
        .context("smtp send failed")?;
    session.quit().await.ok();

    if job.action == Action::SendMsgToSmtp {
        let msg_id = crate::message::MsgId(job.foreign_id as u32);
        crate::message::set_state(context, msg_id, crate::message::MsgState::OutDelivered).await?;
    }
    Ok(())
}
