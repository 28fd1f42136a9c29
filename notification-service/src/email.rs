//! Email rendering and the outgoing mail seam.

use async_trait::async_trait;
use handlebars::Handlebars;
use serde::Serialize;
use serde_json::{json, Value};
use shared::clients::PaymentLine;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutgoingEmail {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("failed to encode email: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("invalid email template: {0}")]
    Template(#[from] handlebars::TemplateError),
    #[error("failed to render email: {0}")]
    Render(#[from] handlebars::RenderError),
}

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Sends the email and returns the transport's message id.
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError>;
}

/// Writes every email to the log instead of delivering it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LoggedEmail<'a> {
    message_id: &'a str,
    #[serde(flatten)]
    email: &'a OutgoingEmail,
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError> {
        let message_id = format!("<{}@ecommerce.local>", Uuid::new_v4());
        let logged = serde_json::to_string(&LoggedEmail {
            message_id: &message_id,
            email: &email,
        })?;
        info!(to = %email.to, subject = %email.subject, "email sent: {}", logged);
        Ok(message_id)
    }
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: String,
    pub supplier_email: String,
    pub low_stock_threshold: i64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            from: "no-reply@ecommerce.local".to_string(),
            supplier_email: "supplier@ecommerce.local".to_string(),
            low_stock_threshold: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LowStock {
    pub to: Option<String>,
    pub product_id: i64,
    pub product_name: String,
    pub current_stock: i64,
    pub threshold: Option<i64>,
}

fn money(amount: f64) -> String {
    format!("R$ {amount:.2}")
}

const CONFIRMATION: &str = "confirmation";
const CANCELLATION: &str = "cancellation";
const LOW_STOCK: &str = "low_stock";

// Subjects are plain text, so they use unescaped `{{{ }}}` expressions.
const TEMPLATES: [(&str, &str, &str); 3] = [
    (
        CONFIRMATION,
        "Payment confirmed - Order {{{order_id}}}",
        "<h1>Payment confirmed</h1>\
         <p>The payment for order <strong>{{order_id}}</strong> was confirmed.</p>\
         <p>Total: <strong>{{amount}}</strong></p>\
         {{#if payments}}<p>Payments:</p><ul>\
         {{#each payments}}<li>• {{method}} - {{amount}}</li>{{/each}}\
         </ul>{{/if}}\
         <p>Your order will be dispatched soon.</p>",
    ),
    (
        CANCELLATION,
        "Payment not approved - Order {{{order_id}}}",
        "<h1>Order cancelled</h1>\
         <p>The payment for order <strong>{{order_id}}</strong> was not approved \
         and the order was cancelled.</p>\
         {{#if amount}}<p>Amount: <strong>{{amount}}</strong></p>{{/if}}",
    ),
    (
        LOW_STOCK,
        "Low stock - {{{product_name}}}",
        "<h1>Low stock alert</h1>\
         <p>Product <strong>{{product_name}}</strong> (#{{product_id}}) has {{current_stock}} units left, \
         at or below the threshold of {{threshold}}.</p>\
         <p>Please restock it.</p>",
    ),
];

/// Handlebars templates for every email this service sends. Values in the
/// HTML bodies are escaped.
pub struct EmailTemplates {
    settings: EmailSettings,
    handlebars: Handlebars<'static>,
}

impl EmailTemplates {
    pub fn new(settings: EmailSettings) -> Result<Self, MailError> {
        let mut handlebars = Handlebars::new();
        for (name, subject, html) in TEMPLATES {
            handlebars.register_template_string(&format!("{name}_subject"), subject)?;
            handlebars.register_template_string(&format!("{name}_html"), html)?;
        }
        Ok(Self { settings, handlebars })
    }

    fn render(&self, name: &str, to: &str, data: &Value) -> Result<OutgoingEmail, MailError> {
        Ok(OutgoingEmail {
            from: self.settings.from.clone(),
            to: to.to_string(),
            subject: self.handlebars.render(&format!("{name}_subject"), data)?,
            html: self.handlebars.render(&format!("{name}_html"), data)?,
        })
    }

    pub fn confirmation(
        &self,
        to: &str,
        order_id: &str,
        amount: f64,
        payments: &[PaymentLine],
    ) -> Result<OutgoingEmail, MailError> {
        let payments: Vec<Value> = payments
            .iter()
            .map(|p| json!({ "method": p.method, "amount": money(p.amount) }))
            .collect();
        let data = json!({
            "order_id": order_id,
            "amount": money(amount),
            "payments": payments,
        });
        self.render(CONFIRMATION, to, &data)
    }

    pub fn cancellation(&self, to: &str, order_id: &str, amount: Option<f64>) -> Result<OutgoingEmail, MailError> {
        let data = json!({
            "order_id": order_id,
            "amount": amount.map(money),
        });
        self.render(CANCELLATION, to, &data)
    }

    pub fn low_stock(&self, alert: &LowStock) -> Result<OutgoingEmail, MailError> {
        let to = alert
            .to
            .as_deref()
            .map(str::trim)
            .filter(|to| !to.is_empty())
            .unwrap_or(&self.settings.supplier_email);
        let data = json!({
            "product_id": alert.product_id,
            "product_name": alert.product_name,
            "current_stock": alert.current_stock,
            "threshold": alert.threshold.unwrap_or(self.settings.low_stock_threshold),
        });
        self.render(LOW_STOCK, to, &data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn templates() -> EmailTemplates {
        EmailTemplates::new(EmailSettings::default()).unwrap()
    }

    fn line(method: &str, amount: f64) -> PaymentLine {
        PaymentLine {
            method: method.into(),
            amount,
            success: Some(true),
        }
    }

    #[test]
    fn confirmation_lists_each_payment() {
        let payments = vec![line("PIX", 100.0), line("Cartão", 49.5)];
        let email = templates()
            .confirmation("ana@example.com", "o-1", 149.5, &payments)
            .unwrap();

        assert_eq!(email.subject, "Payment confirmed - Order o-1");
        assert_eq!(email.from, "no-reply@ecommerce.local");
        assert!(email.html.contains("R$ 149.50"));
        assert!(email.html.contains("• PIX - R$ 100.00"));
        assert!(email.html.contains("• Cartão - R$ 49.50"));
    }

    #[test]
    fn confirmation_without_payments_has_no_breakdown() {
        let email = templates().confirmation("ana@example.com", "o-1", 10.0, &[]).unwrap();
        assert!(!email.html.contains("<ul>"));
    }

    #[test]
    fn cancellation_amount_is_optional() {
        let templates = templates();
        let without = templates.cancellation("ana@example.com", "o-1", None).unwrap();
        assert!(!without.html.contains("R$"));
        let with = templates.cancellation("ana@example.com", "o-1", Some(10.0)).unwrap();
        assert!(with.html.contains("R$ 10.00"));
    }

    #[test]
    fn low_stock_falls_back_to_the_supplier_and_threshold() {
        let templates = EmailTemplates::new(EmailSettings {
            supplier_email: "buyer@example.com".into(),
            low_stock_threshold: 7,
            ..Default::default()
        })
        .unwrap();
        let alert = LowStock {
            to: Some("  ".into()),
            product_id: 4,
            product_name: "Keyboard".into(),
            current_stock: 2,
            threshold: None,
        };

        let email = templates.low_stock(&alert).unwrap();
        assert_eq!(email.to, "buyer@example.com");
        assert_eq!(email.subject, "Low stock - Keyboard");
        assert!(email.html.contains("threshold of 7"));

        let explicit = LowStock {
            to: Some("ops@example.com".into()),
            threshold: Some(3),
            ..alert
        };
        let email = templates.low_stock(&explicit).unwrap();
        assert_eq!(email.to, "ops@example.com");
        assert!(email.html.contains("threshold of 3"));
    }

    #[test]
    fn request_values_are_escaped_in_the_body() {
        let templates = templates();
        let alert = LowStock {
            to: None,
            product_id: 1,
            product_name: "<script>alert(1)</script>".into(),
            current_stock: 0,
            threshold: None,
        };
        let email = templates.low_stock(&alert).unwrap();
        assert!(!email.html.contains("<script>"));
        assert!(email.html.contains("&lt;script&gt;"));

        let payments = vec![line("<b>PIX</b>", 5.0)];
        let email = templates
            .confirmation("ana@example.com", "<i>o-1</i>", 5.0, &payments)
            .unwrap();
        assert!(!email.html.contains("<b>PIX</b>"));
        assert!(!email.html.contains("<i>o-1</i>"));
    }

    #[tokio::test]
    async fn log_mailer_returns_a_message_id() {
        let email = templates().confirmation("a@b.c", "o-1", 1.0, &[]).unwrap();
        let id = LogMailer.send(email).await.unwrap();
        assert!(id.ends_with("@ecommerce.local>"));
    }
}
