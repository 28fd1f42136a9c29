use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    #[serde(rename = "PIX")]
    Pix,
    #[serde(rename = "Boleto")]
    Boleto,
    #[serde(rename = "Cartão")]
    Card,
}

impl PaymentMethod {
    pub const ACCEPTED: [PaymentMethod; 3] = [PaymentMethod::Pix, PaymentMethod::Boleto, PaymentMethod::Card];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Pix => "PIX",
            PaymentMethod::Boleto => "Boleto",
            PaymentMethod::Card => "Cartão",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        PaymentMethod::ACCEPTED
            .into_iter()
            .find(|method| method.as_str() == s)
            .ok_or_else(|| format!("invalid payment method: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Authorization<'a> {
    pub method: &'a str,
    pub amount: f64,
    pub card_number: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Approved,
    Declined(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn authorize(&self, request: &Authorization<'_>) -> Decision;
}

/// Deterministic stand-in for a card processor.
#[derive(Debug, Clone)]
pub struct SimulatedGateway {
    limit: f64,
}

impl SimulatedGateway {
    pub fn new(limit: f64) -> Self {
        Self { limit }
    }
}

impl Default for SimulatedGateway {
    fn default() -> Self {
        Self::new(50_000.0)
    }
}

#[async_trait]
impl PaymentGateway for SimulatedGateway {
    async fn authorize(&self, request: &Authorization<'_>) -> Decision {
        let method = match request.method.parse::<PaymentMethod>() {
            Ok(method) => method,
            Err(reason) => return Decision::Declined(reason),
        };
        if method == PaymentMethod::Card {
            match request.card_number {
                None => return Decision::Declined("card number is required".into()),
                Some(number) if !luhn_valid(number) => {
                    return Decision::Declined("card number is invalid".into())
                }
                Some(_) => {}
            }
        }
        if request.amount > self.limit {
            return Decision::Declined(format!("amount exceeds the limit of {:.2}", self.limit));
        }
        Decision::Approved
    }
}

/// Luhn checksum over 12 to 19 digits. Spaces and dashes are ignored.
pub fn luhn_valid(number: &str) -> bool {
    let mut digits = Vec::with_capacity(number.len());
    for c in number.chars() {
        match c {
            ' ' | '-' => continue,
            c => match c.to_digit(10) {
                Some(d) => digits.push(d),
                None => return false,
            },
        }
    }
    if !(12..=19).contains(&digits.len()) {
        return false;
    }

    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request<'a>(method: &'a str, amount: f64, card_number: Option<&'a str>) -> Authorization<'a> {
        Authorization {
            method,
            amount,
            card_number,
        }
    }

    #[test]
    fn methods_parse_by_their_display_names() {
        assert_eq!("PIX".parse::<PaymentMethod>(), Ok(PaymentMethod::Pix));
        assert_eq!(" Cartão ".parse::<PaymentMethod>(), Ok(PaymentMethod::Card));
        assert!("Bitcoin".parse::<PaymentMethod>().is_err());
        assert_eq!(serde_json::to_string(&PaymentMethod::Card).unwrap(), "\"Cartão\"");
    }

    #[test]
    fn luhn_accepts_known_test_cards() {
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(luhn_valid("5555-5555-5555-4444"));
        assert!(!luhn_valid("4111 1111 1111 1112"));
        assert!(!luhn_valid("4111"));
        assert!(!luhn_valid("4111 1111 1111 111a"));
    }

    #[tokio::test]
    async fn simulated_gateway_applies_its_rules() {
        let gateway = SimulatedGateway::new(1_000.0);

        assert_eq!(gateway.authorize(&request("PIX", 100.0, None)).await, Decision::Approved);
        assert_eq!(
            gateway.authorize(&request("Cartão", 100.0, Some("4111111111111111"))).await,
            Decision::Approved
        );
        assert!(matches!(
            gateway.authorize(&request("Cheque", 100.0, None)).await,
            Decision::Declined(_)
        ));
        assert!(matches!(
            gateway.authorize(&request("Cartão", 100.0, None)).await,
            Decision::Declined(_)
        ));
        assert!(matches!(
            gateway.authorize(&request("Cartão", 100.0, Some("1234567890123"))).await,
            Decision::Declined(_)
        ));
        assert!(matches!(
            gateway.authorize(&request("Boleto", 1_000.01, None)).await,
            Decision::Declined(reason) if reason.contains("limit")
        ));
    }
}
