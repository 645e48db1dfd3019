use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::vehicle::VehicleCategory;

/// Fixed prefix of every scannable token code.
pub const CODE_PREFIX: &str = "MMIS-";

/// Number of decimal digits after the prefix.
pub const CODE_DIGITS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum TokenKind {
    Entry,
    Exit,
}

/// Stored token status. `Expired` is normally derived at read time (see
/// [`Token::effective_status`]); the expiry sweeper may also persist it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "UPPERCASE")]
#[sqlx(type_name = "varchar", rename_all = "UPPERCASE")]
pub enum TokenStatus {
    Active,
    Used,
    Expired,
}

impl TokenStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TokenStatus::Active => "ACTIVE",
            TokenStatus::Used => "USED",
            TokenStatus::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, TokenStatus::Active)
    }
}

/// A credential for one gate crossing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: Uuid,
    pub code: String,
    pub kind: TokenKind,
    /// Vehicle plate or entity name.
    pub subject: String,
    /// Declared at entry; a vehicle issued a token while the facility was
    /// full is assigned a slot of this category when the token is scanned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<VehicleCategory>,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
    /// Terminal that issued the token.
    pub issued_by: String,
    pub fee: Option<Decimal>,
    pub fee_paid: bool,
}

impl Token {
    /// Status as of `now`: an `Active` token older than `ttl` reads as
    /// `Expired`. Never writes.
    pub fn effective_status(&self, now: DateTime<Utc>, ttl: Duration) -> TokenStatus {
        match self.status {
            TokenStatus::Active if now - self.issued_at > ttl => TokenStatus::Expired,
            other => other,
        }
    }

    /// Copy of this token with the status field replaced by its effective value.
    pub fn as_of(&self, now: DateTime<Utc>, ttl: Duration) -> Token {
        Token {
            status: self.effective_status(now, ttl),
            ..self.clone()
        }
    }
}

/// True if `code` has the `MMIS-dddd` shape.
pub fn is_well_formed_code(code: &str) -> bool {
    code.strip_prefix(CODE_PREFIX)
        .map(|digits| digits.len() == CODE_DIGITS && digits.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token_issued_at(issued_at: DateTime<Utc>, status: TokenStatus) -> Token {
        Token {
            id: Uuid::new_v4(),
            code: "MMIS-0042".into(),
            kind: TokenKind::Entry,
            subject: "KA-01-AB-1234".into(),
            category: Some(VehicleCategory::Car),
            status,
            issued_at,
            issued_by: "gate-1".into(),
            fee: Some(Decimal::from(3000)),
            fee_paid: true,
        }
    }

    #[test]
    fn test_effective_status_expires_after_ttl() {
        let issued = Utc::now();
        let tok = token_issued_at(issued, TokenStatus::Active);
        let ttl = Duration::hours(24);

        assert_eq!(tok.effective_status(issued + Duration::hours(23), ttl), TokenStatus::Active);
        assert_eq!(tok.effective_status(issued + Duration::hours(24), ttl), TokenStatus::Active);
        assert_eq!(tok.effective_status(issued + Duration::hours(25), ttl), TokenStatus::Expired);
    }

    #[test]
    fn test_used_token_never_reads_expired() {
        let issued = Utc::now();
        let tok = token_issued_at(issued, TokenStatus::Used);
        assert_eq!(
            tok.effective_status(issued + Duration::days(30), Duration::hours(24)),
            TokenStatus::Used
        );
    }

    #[test]
    fn test_code_shape() {
        assert!(is_well_formed_code("MMIS-0000"));
        assert!(is_well_formed_code("MMIS-9381"));
        assert!(!is_well_formed_code("MMIS-123"));
        assert!(!is_well_formed_code("MMIS-12a4"));
        assert!(!is_well_formed_code("XMIS-1234"));
    }
}
