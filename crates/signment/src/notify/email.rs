//! Email notification delivery over SMTP.
//!
//! Messages are multipart/alternative with an HTML body and a plain-text
//! fallback, carrying a tracking link and an unsubscribe link.

use lettre::message::{header::ContentType, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::core::config;
use crate::core::error::{AppError, AppResult};
use crate::notify::EmailPayload;

const HTML_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>Shipment Update</title>
</head>
<body style="font-family: Arial, sans-serif; margin: 0; padding: 0; background-color: #f4f4f4;">
<table width="100%" cellpadding="0" cellspacing="0" style="max-width: 600px; margin: 20px auto; background-color: #ffffff; border: 1px solid #e0e0e0; border-radius: 8px;">
<tr>
<td style="background-color: #007bff; padding: 20px; text-align: center; border-radius: 8px 8px 0 0;">
<h1 style="color: #ffffff; margin: 0; font-size: 24px;">Shipment Update</h1>
</td>
</tr>
<tr>
<td style="padding: 20px;">
<h2 style="color: #333333; font-size: 20px; margin-top: 0;">Tracking Number: {tracking_number}</h2>
<p style="color: #555555; font-size: 16px; line-height: 1.5;">
Dear Customer,<br>
Your shipment has been updated. Below are the latest details:
</p>
<table width="100%" cellpadding="10" cellspacing="0" style="border-collapse: collapse; margin: 20px 0;">
<tr>
<td style="font-weight: bold; color: #333333; border-bottom: 1px solid #e0e0e0;">Status</td>
<td style="color: #007bff; border-bottom: 1px solid #e0e0e0;">{status}</td>
</tr>
<tr>
<td style="font-weight: bold; color: #333333; border-bottom: 1px solid #e0e0e0;">Delivery Location</td>
<td style="color: #555555; border-bottom: 1px solid #e0e0e0;">{delivery_location}</td>
</tr>
</table>
<h3 style="color: #333333; font-size: 18px; margin-top: 20px;">Checkpoints</h3>
{checkpoints_html}
<p style="color: #555555; font-size: 16px; line-height: 1.5;">
Track your shipment in real-time at: <a href="{tracking_url}" style="color: #007bff; text-decoration: none;">Track Now</a>
</p>
</td>
</tr>
<tr>
<td style="background-color: #f8f9fa; padding: 15px; text-align: center; border-radius: 0 0 8px 8px; font-size: 14px; color: #555555;">
<p style="margin: 0;">For support, contact us at <a href="mailto:support@example.com" style="color: #007bff; text-decoration: none;">support@example.com</a></p>
<p style="margin: 5px 0;">Signment | 123 Logistics Lane, Lagos, NG</p>
<p style="margin: 0;"><a href="{unsubscribe_url}" style="color: #007bff; text-decoration: none;">Unsubscribe</a></p>
</td>
</tr>
</table>
</body>
</html>
"#;

const PLAIN_TEMPLATE: &str = r#"Shipment Update for {tracking_number}

Dear Customer,

Your shipment has been updated. Below are the latest details:

Tracking Number: {tracking_number}
Status: {status}
Delivery Location: {delivery_location}
Checkpoints:
{checkpoints_text}

Track your shipment: {tracking_url}

For support, contact us at support@example.com
Signment | 123 Logistics Lane, Lagos, NG
Unsubscribe: {unsubscribe_url}
"#;

/// Rendered bodies for one shipment-update email.
#[derive(Debug)]
pub struct RenderedEmail {
    pub subject: String,
    pub html: String,
    pub text: String,
}

/// Fills the templates for a payload.
pub fn render_email(tracking_number: &str, payload: &EmailPayload) -> RenderedEmail {
    let base = config::PUBLIC_BASE_URL.as_str();
    let tracking_url = format!("{}/track?tracking_number={}", base, tracking_number);
    let unsubscribe_url = format!("{}/unsubscribe?email={}", base, payload.recipient_email);

    let checkpoints: Vec<&str> = payload.checkpoints.split(';').filter(|c| !c.is_empty()).collect();

    let checkpoints_html = if checkpoints.is_empty() {
        "<p>No checkpoints available.</p>".to_string()
    } else {
        let items: String = checkpoints
            .iter()
            .map(|cp| {
                format!(
                    "<li style='color: #555555; font-size: 14px; line-height: 1.5;'>{}</li>",
                    html_escape(cp)
                )
            })
            .collect();
        format!("<ul style='padding-left: 20px;'>{}</ul>", items)
    };

    let checkpoints_text = if checkpoints.is_empty() {
        "No checkpoints available.".to_string()
    } else {
        checkpoints
            .iter()
            .map(|cp| format!("- {}", cp))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = HTML_TEMPLATE
        .replace("{tracking_number}", &html_escape(tracking_number))
        .replace("{status}", &html_escape(&payload.status))
        .replace("{delivery_location}", &html_escape(&payload.delivery_location))
        .replace("{checkpoints_html}", &checkpoints_html)
        .replace("{tracking_url}", &tracking_url)
        .replace("{unsubscribe_url}", &unsubscribe_url);

    let text = PLAIN_TEMPLATE
        .replace("{tracking_number}", tracking_number)
        .replace("{status}", &payload.status)
        .replace("{delivery_location}", &payload.delivery_location)
        .replace("{checkpoints_text}", &checkpoints_text)
        .replace("{tracking_url}", &tracking_url)
        .replace("{unsubscribe_url}", &unsubscribe_url);

    RenderedEmail {
        subject: format!("Shipment Update for {}", tracking_number),
        html,
        text,
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// SMTP mailer. Construction fails fast on a bad relay host; actual
/// connections happen per send.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    /// Builds a mailer from the SMTP_* environment configuration.
    /// Returns `None` when credentials are not configured.
    pub fn from_env() -> AppResult<Option<Self>> {
        if !config::smtp::is_configured() {
            return Ok(None);
        }

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(config::smtp::HOST.as_str())?
            .port(*config::smtp::PORT)
            .credentials(Credentials::new(
                config::smtp::USER.clone(),
                config::smtp::PASS.clone(),
            ))
            .build();

        let from = config::smtp::FROM
            .parse::<Mailbox>()
            .map_err(|e| AppError::Validation(format!("Invalid SMTP_FROM address: {}", e)))?;

        Ok(Some(Self { transport, from }))
    }

    /// Sends one shipment-update email.
    pub async fn send(&self, tracking_number: &str, payload: &EmailPayload) -> AppResult<()> {
        let to = payload
            .recipient_email
            .parse::<Mailbox>()
            .map_err(|e| AppError::Validation(format!("Invalid recipient address: {}", e)))?;

        let rendered = render_email(tracking_number, payload);

        let message = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(rendered.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(rendered.text),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(rendered.html),
                    ),
            )?;

        self.transport.send(message).await?;
        log::info!("Email sent to {} for {}", payload.recipient_email, tracking_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> EmailPayload {
        EmailPayload {
            status: "In_Transit".to_string(),
            checkpoints: "2025-01-01 12:00 - Lagos, NG - Processed;2025-01-02 08:30 - Abuja, NG - Processed"
                .to_string(),
            delivery_location: "Lagos, NG".to_string(),
            recipient_email: "user@example.com".to_string(),
        }
    }

    #[test]
    fn test_render_email_includes_fields() {
        let rendered = render_email("TRK1", &payload());
        assert!(rendered.subject.contains("TRK1"));
        assert!(rendered.html.contains("In_Transit"));
        assert!(rendered.html.contains("Lagos, NG"));
        assert!(rendered.html.contains("Abuja, NG"));
        assert!(rendered.text.contains("- 2025-01-01 12:00 - Lagos, NG - Processed"));
        assert!(rendered.text.contains("Unsubscribe"));
    }

    #[test]
    fn test_render_email_without_checkpoints() {
        let mut p = payload();
        p.checkpoints = String::new();
        let rendered = render_email("TRK2", &p);
        assert!(rendered.html.contains("No checkpoints available."));
        assert!(rendered.text.contains("No checkpoints available."));
    }

    #[test]
    fn test_html_escaping() {
        let mut p = payload();
        p.status = "<script>".to_string();
        let rendered = render_email("TRK3", &p);
        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("&lt;script&gt;"));
    }
}
