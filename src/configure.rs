//! Autoconfig + the `CONFIGURE_IMAP` job.

use anyhow::{bail, Result};

use crate::context::Context;
use crate::events::Event;
use crate::job::Job;
use crate::login_param::LoginParam;

/// Tries each autoconfig endpoint in a fixed order and returns the first
/// one that parses as a well-formed login descriptor.
pub async fn autoconfig(context: &Context, addr: &str) -> Option<LoginParam> {
    let Some((_, domain)) = addr.split_once('@') else {
        return None;
    };
    let candidates = [
        format!("https://autoconfig.{domain}/mail/config-v1.1.xml?emailaddress={addr}"),
        format!("http://autoconfig.{domain}/mail/config-v1.1.xml?emailaddress={addr}"),
        format!("https://{domain}/.well-known/autoconfig/mail/config-v1.1.xml"),
        format!("https://{domain}/autodiscover/autodiscover.xml"),
        format!("http://{domain}/autodiscover/autodiscover.xml"),
        format!("https://autoconfig.thunderbird.net/v1.1/{domain}"),
    ];
    for url in candidates {
        if let Some(body) = context.http_get(&url).await {
            if let Some(param) = parse_autoconfig_xml(&body, addr) {
                return Some(param);
            }
        }
    }
    None
}

/// Pulls `<hostname>`/`<port>`/`<username>` out of the `incomingServer`/
/// `outgoingServer` blocks of an ISP-autoconfig or Autodiscover document.
/// Both formats use the same element names closely enough that one
/// tolerant scan covers both, reusing one XML reader across both ladder
/// branches.
fn parse_autoconfig_xml(xml: &str, addr: &str) -> Option<LoginParam> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::reader::Reader;

    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut in_incoming = false;
    let mut in_outgoing = false;
    let mut current_tag = String::new();

    let mut imap = crate::login_param::ServerParam {
        server: String::new(),
        port: 0,
        user: String::new(),
        password: String::new(),
    };
    let mut smtp = imap.clone();

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "incomingServer" => in_incoming = true,
                    "outgoingServer" => in_outgoing = true,
                    _ => {}
                }
                current_tag = name;
            }
            Ok(XmlEvent::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                match name.as_str() {
                    "incomingServer" => in_incoming = false,
                    "outgoingServer" => in_outgoing = false,
                    _ => {}
                }
            }
            Ok(XmlEvent::Text(t)) => {
                let text = t.unescape().ok()?.to_string();
                let target = if in_incoming {
                    Some(&mut imap)
                } else if in_outgoing {
                    Some(&mut smtp)
                } else {
                    None
                };
                if let Some(server) = target {
                    match current_tag.as_str() {
                        "hostname" => server.server = text,
                        "port" => server.port = text.parse().unwrap_or(0),
                        "username" => server.user = text,
                        _ => {}
                    }
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }

    if imap.server.is_empty() && smtp.server.is_empty() {
        return None;
    }
    let mut param = LoginParam {
        addr: addr.to_string(),
        imap,
        smtp,
        server_flags: crate::config::ServerFlags(0),
    };
    param.fill_defaults();
    Some(param)
}

/// Runs a `CONFIGURE_IMAP` job to completion: resolve endpoints (via
/// autoconfig, then manual defaults), connect-test both adapters, and on
/// success promote the candidate config to `configured_*`.
pub async fn run_job(context: &Context, _job: &Job) -> Result<()> {
    context.emit_event(Event::ConfigureProgress(0));

    let mut param = LoginParam::from_candidate_config(context).await;
    if param.addr.is_empty() {
        bail!("configure: no address set");
    }

    if param.imap.server.is_empty() {
        if let Some(discovered) = autoconfig(context, &param.addr).await {
            param = discovered;
        }
    }
    param.fill_defaults();
    context.emit_event(Event::ConfigureProgress(200));

    crate::imap::connect_test(&param).await?;
    context.emit_event(Event::ConfigureProgress(600));

    crate::smtp::connect_test(&param).await?;
    context.emit_event(Event::ConfigureProgress(900));

    param.save_as_configured(context).await?;
    context.emit_event(Event::ConfigureProgress(1000));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_isp_autoconfig_document() {
        let xml = r#"
            <clientConfig version="1.1">
              <emailProvider id="example.org">
                <incomingServer type="imap">
                  <hostname>imap.example.org</hostname>
                  <port>993</port>
                  <username>me@example.org</username>
                </incomingServer>
                <outgoingServer type="smtp">
                  <hostname>smtp.example.org</hostname>
                  <port>465</port>
                  <username>me@example.org</username>
                </outgoingServer>
              </emailProvider>
            </clientConfig>
        "#;
        let param = parse_autoconfig_xml(xml, "me@example.org").unwrap();
        assert_eq!(param.imap.server, "imap.example.org");
        assert_eq!(param.imap.port, 993);
        assert_eq!(param.smtp.server, "smtp.example.org");
    }

    #[test]
    fn malformed_document_yields_none() {
        assert!(parse_autoconfig_xml("not xml at all", "me@example.org").is_none());
    }
}
