//! Attendance email delivery through the Brevo transactional API.

use crate::config::MailConfig;
use rollcall_core::Notification;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("mail not configured: {0}")]
    NotConfigured(&'static str),
    #[error("email API request failed: {0}")]
    Http(#[from] ureq::Error),
}

/// Delivers a rendered attendance notification.
pub trait Notifier: Send + Sync {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

#[derive(Debug, Clone, Serialize)]
struct Contact {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendSmtpEmail<'a> {
    sender: &'a Contact,
    to: &'a [Contact],
    subject: &'a str,
    html_content: String,
}

pub struct BrevoNotifier {
    agent: ureq::Agent,
    api_url: String,
    api_key: String,
    sender: Contact,
    recipients: Vec<Contact>,
}

impl BrevoNotifier {
    /// Build from config. `Ok(None)` when no API key is set.
    pub fn from_config(mail: &MailConfig) -> Result<Option<Self>, NotifyError> {
        let Some(api_key) = mail.api_key.clone() else {
            return Ok(None);
        };
        let sender_email = mail
            .sender_email
            .clone()
            .ok_or(NotifyError::NotConfigured("sender_email is required"))?;
        if mail.recipients.is_empty() {
            return Err(NotifyError::NotConfigured("at least one recipient is required"));
        }

        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build()
            .into();

        Ok(Some(Self {
            agent,
            api_url: mail.api_url.clone(),
            api_key,
            sender: Contact {
                name: Some(mail.sender_name.clone()),
                email: sender_email,
            },
            recipients: mail
                .recipients
                .iter()
                .map(|email| Contact {
                    name: None,
                    email: email.clone(),
                })
                .collect(),
        }))
    }

    fn payload<'a>(&'a self, notification: &'a Notification) -> SendSmtpEmail<'a> {
        SendSmtpEmail {
            sender: &self.sender,
            to: &self.recipients,
            subject: &notification.subject,
            html_content: format!("<html><body>{}</body></html>", notification.html_body),
        }
    }
}

impl Notifier for BrevoNotifier {
    fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let response = self
            .agent
            .post(self.api_url.as_str())
            .header("api-key", self.api_key.as_str())
            .header("accept", "application/json")
            .send_json(self.payload(notification))?;

        tracing::info!(
            status = response.status().as_u16(),
            recipients = self.recipients.len(),
            "attendance email accepted"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::mpsc;
    use tiny_http::{Response, Server};

    fn mail(api_url: &str) -> MailConfig {
        MailConfig {
            api_key: Some("xkeysib-test".into()),
            api_url: api_url.into(),
            sender_name: "Attendance System".into(),
            sender_email: Some("noreply@example.com".into()),
            recipients: vec!["head@example.com".into()],
        }
    }

    fn notification() -> Notification {
        Notification {
            subject: "Attendance List".into(),
            html_body: "<h1>Attendance List</h1><ul>alice</ul>".into(),
        }
    }

    struct Captured {
        api_key: Option<String>,
        body: serde_json::Value,
    }

    /// One-shot mock email endpoint answering with `status`.
    fn mock_endpoint(status: u16) -> (String, mpsc::Receiver<Captured>) {
        let server = Server::http("127.0.0.1:0").unwrap();
        let port = server.server_addr().to_ip().unwrap().port();
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            if let Ok(mut req) = server.recv() {
                let api_key = req
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("api-key"))
                    .map(|h| h.value.as_str().to_string());
                let mut body = String::new();
                req.as_reader().read_to_string(&mut body).unwrap();
                let _ = tx.send(Captured {
                    api_key,
                    body: serde_json::from_str(&body).unwrap(),
                });
                let _ = req.respond(Response::from_string(r#"{"messageId":"<1@brevo>"}"#).with_status_code(status));
            }
        });
        (format!("http://127.0.0.1:{port}/v3/smtp/email"), rx)
    }

    #[test]
    fn test_not_configured_without_key() {
        let mut cfg = mail("http://unused");
        cfg.api_key = None;
        assert!(BrevoNotifier::from_config(&cfg).unwrap().is_none());
    }

    #[test]
    fn test_requires_sender_and_recipients() {
        let mut cfg = mail("http://unused");
        cfg.sender_email = None;
        assert!(matches!(
            BrevoNotifier::from_config(&cfg),
            Err(NotifyError::NotConfigured(_))
        ));

        let mut cfg = mail("http://unused");
        cfg.recipients.clear();
        assert!(matches!(
            BrevoNotifier::from_config(&cfg),
            Err(NotifyError::NotConfigured(_))
        ));
    }

    #[test]
    fn test_send_posts_brevo_payload() {
        let (url, captured) = mock_endpoint(201);
        let notifier = BrevoNotifier::from_config(&mail(&url)).unwrap().unwrap();
        notifier.send(&notification()).unwrap();

        let got = captured.recv().unwrap();
        assert_eq!(got.api_key.as_deref(), Some("xkeysib-test"));
        assert_eq!(got.body["subject"], "Attendance List");
        assert_eq!(got.body["sender"]["name"], "Attendance System");
        assert_eq!(got.body["sender"]["email"], "noreply@example.com");
        assert_eq!(got.body["to"][0]["email"], "head@example.com");
        assert!(got.body["to"][0].get("name").is_none());
        assert_eq!(
            got.body["htmlContent"],
            "<html><body><h1>Attendance List</h1><ul>alice</ul></body></html>"
        );
    }

    #[test]
    fn test_rejected_request_is_error() {
        let (url, _captured) = mock_endpoint(401);
        let notifier = BrevoNotifier::from_config(&mail(&url)).unwrap().unwrap();
        assert!(matches!(
            notifier.send(&notification()),
            Err(NotifyError::Http(ureq::Error::StatusCode(401)))
        ));
    }
}
