use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::slot::{ParkingSlot, SlotStatus, Zone};
use crate::models::token::{Token, TokenKind, TokenStatus};
use crate::models::vehicle::VehicleCategory;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // -- Token Operations --

    pub async fn load_tokens(&self) -> anyhow::Result<Vec<Token>> {
        let rows = sqlx::query_as::<_, TokenRow>(
            "SELECT id, code, kind, subject, category, status, issued_at, issued_by, fee, fee_paid FROM gate_tokens ORDER BY issued_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Token::from).collect())
    }

    pub async fn upsert_token(&self, token: &Token) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO gate_tokens (id, code, kind, subject, category, status, issued_at, issued_by, fee, fee_paid)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
               ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, fee_paid = EXCLUDED.fee_paid"#,
        )
        .bind(token.id)
        .bind(&token.code)
        .bind(token.kind)
        .bind(&token.subject)
        .bind(token.category)
        .bind(token.status)
        .bind(token.issued_at)
        .bind(&token.issued_by)
        .bind(token.fee)
        .bind(token.fee_paid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_token(&self, id: Uuid) -> anyhow::Result<bool> {
        let result = sqlx::query("DELETE FROM gate_tokens WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -- Slot Operations --

    pub async fn load_slots(&self) -> anyhow::Result<Vec<ParkingSlot>> {
        let rows = sqlx::query_as::<_, SlotRow>(
            "SELECT id, number, label, zone, status, occupant, updated_at FROM parking_slots ORDER BY number ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ParkingSlot::try_from).collect()
    }

    pub async fn upsert_slot(&self, slot: &ParkingSlot) -> anyhow::Result<()> {
        sqlx::query(
            r#"INSERT INTO parking_slots (id, number, label, zone, status, occupant, updated_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7)
               ON CONFLICT (id) DO UPDATE
               SET status = EXCLUDED.status, occupant = EXCLUDED.occupant, updated_at = EXCLUDED.updated_at"#,
        )
        .bind(slot.id)
        .bind(i32::try_from(slot.number)?)
        .bind(&slot.label)
        .bind(slot.zone)
        .bind(slot.status)
        .bind(&slot.occupant)
        .bind(slot.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert the initial layout in one transaction. Only called when the
    /// table is empty.
    pub async fn seed_slots(&self, slots: &[ParkingSlot]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for slot in slots {
            sqlx::query(
                r#"INSERT INTO parking_slots (id, number, label, zone, status, occupant, updated_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            )
            .bind(slot.id)
            .bind(i32::try_from(slot.number)?)
            .bind(&slot.label)
            .bind(slot.zone)
            .bind(slot.status)
            .bind(&slot.occupant)
            .bind(slot.updated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// -- Row Types --

#[derive(Debug, sqlx::FromRow)]
pub struct TokenRow {
    pub id: Uuid,
    pub code: String,
    pub kind: TokenKind,
    pub subject: String,
    pub category: Option<VehicleCategory>,
    pub status: TokenStatus,
    pub issued_at: DateTime<Utc>,
    pub issued_by: String,
    pub fee: Option<Decimal>,
    pub fee_paid: bool,
}

impl From<TokenRow> for Token {
    fn from(r: TokenRow) -> Self {
        Token {
            id: r.id,
            code: r.code,
            kind: r.kind,
            subject: r.subject,
            category: r.category,
            status: r.status,
            issued_at: r.issued_at,
            issued_by: r.issued_by,
            fee: r.fee,
            fee_paid: r.fee_paid,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SlotRow {
    pub id: Uuid,
    pub number: i32,
    pub label: String,
    pub zone: Zone,
    pub status: SlotStatus,
    pub occupant: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<SlotRow> for ParkingSlot {
    type Error = anyhow::Error;

    fn try_from(r: SlotRow) -> anyhow::Result<Self> {
        Ok(ParkingSlot {
            id: r.id,
            number: u32::try_from(r.number)
                .map_err(|_| anyhow::anyhow!("slot {} has negative number {}", r.id, r.number))?,
            label: r.label,
            zone: r.zone,
            status: r.status,
            occupant: r.occupant,
            updated_at: r.updated_at,
        })
    }
}
