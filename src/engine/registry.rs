//! Issued tokens.
//!
//! Every token sits behind its own async mutex inside a `DashMap`; the code
//! index is a second `DashMap` whose entry API makes code reservation atomic.
//! Codes are never removed from the index, so a code is unique across every
//! token ever issued, including deleted ones.

use std::sync::Arc;

use chrono::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::audit::AuditNote;
use super::journal::JournalRecord;
use super::EngineContext;
use crate::errors::GateError;
use crate::models::audit::AuditKind;
use crate::models::token::{Token, TokenKind, TokenStatus, CODE_PREFIX};
use crate::models::vehicle::VehicleCategory;

/// Random draws before falling back to a linear walk of the code space.
const MAX_RANDOM_ATTEMPTS: usize = 32;

/// `MMIS-0000` through `MMIS-9999`.
const CODE_SPACE: u32 = 10_000;

type TokenCell = Arc<Mutex<Token>>;

pub struct TokenRegistry {
    tokens: DashMap<Uuid, TokenCell>,
    by_code: DashMap<String, Uuid>,
    ttl: Duration,
    ctx: EngineContext,
}

fn format_code(n: u32) -> String {
    format!("{}{:04}", CODE_PREFIX, n)
}

/// Scanners and keyboards add whitespace and lowercase; codes are stored
/// upper-case.
fn normalize_code(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

impl TokenRegistry {
    pub fn new(ttl: Duration, ctx: EngineContext) -> Self {
        Self {
            tokens: DashMap::new(),
            by_code: DashMap::new(),
            ttl,
            ctx,
        }
    }

    /// Rebuild from persisted tokens.
    pub fn restore(tokens: Vec<Token>, ttl: Duration, ctx: EngineContext) -> anyhow::Result<Self> {
        let registry = Self::new(ttl, ctx);
        for token in tokens {
            match registry.by_code.entry(token.code.clone()) {
                Entry::Occupied(_) => anyhow::bail!("duplicate token code {}", token.code),
                Entry::Vacant(v) => {
                    v.insert(token.id);
                }
            }
            registry.tokens.insert(token.id, Arc::new(Mutex::new(token)));
        }
        Ok(registry)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Issue an ENTRY token. Negative fees are clamped to zero.
    pub fn issue_entry(
        &self,
        subject: &str,
        category: VehicleCategory,
        fee: Option<Decimal>,
        fee_paid: bool,
        issued_by: &str,
    ) -> Result<Token, GateError> {
        let fee = fee.map(|f| f.max(Decimal::ZERO));
        self.issue(TokenKind::Entry, subject, Some(category), fee, fee_paid, issued_by)
    }

    pub fn issue_exit(&self, subject: &str, issued_by: &str) -> Result<Token, GateError> {
        self.issue(TokenKind::Exit, subject, None, None, false, issued_by)
    }

    fn issue(
        &self,
        kind: TokenKind,
        subject: &str,
        category: Option<VehicleCategory>,
        fee: Option<Decimal>,
        fee_paid: bool,
        issued_by: &str,
    ) -> Result<Token, GateError> {
        let id = Uuid::new_v4();
        let code = self.reserve_code(id)?;
        let token = Token {
            id,
            code,
            kind,
            subject: subject.to_string(),
            category,
            status: TokenStatus::Active,
            issued_at: self.ctx.clock.now(),
            issued_by: issued_by.to_string(),
            fee,
            fee_paid,
        };
        // The code is reserved but resolves to nothing until the insert, so no
        // scan can journal USED ahead of this ACTIVE record.
        self.ctx.journal.record(JournalRecord::Token(token.clone()));
        self.tokens.insert(id, Arc::new(Mutex::new(token.clone())));
        tracing::info!(
            code = %token.code,
            kind = ?token.kind,
            subject = %token.subject,
            issued_by = %token.issued_by,
            "token issued"
        );
        Ok(token)
    }

    /// Claim an unused code for `id`. Random draws first; once the space is
    /// dense, walk it from a random start so issuance still terminates.
    fn reserve_code(&self, id: Uuid) -> Result<String, GateError> {
        let mut rng = rand::thread_rng();
        for _ in 0..MAX_RANDOM_ATTEMPTS {
            let code = format_code(rng.gen_range(0..CODE_SPACE));
            if self.claim_code(&code, id) {
                return Ok(code);
            }
            tracing::debug!(code = %code, "token code collision, regenerating");
        }

        let start = rng.gen_range(0..CODE_SPACE);
        for offset in 0..CODE_SPACE {
            let code = format_code((start + offset) % CODE_SPACE);
            if self.claim_code(&code, id) {
                return Ok(code);
            }
        }
        tracing::error!(issued = self.by_code.len(), "every token code is taken");
        Err(GateError::CodeSpaceExhausted)
    }

    fn claim_code(&self, code: &str, id: Uuid) -> bool {
        match self.by_code.entry(code.to_string()) {
            Entry::Vacant(v) => {
                v.insert(id);
                true
            }
            Entry::Occupied(_) => false,
        }
    }

    fn cell_by_id(&self, id: Uuid) -> Result<TokenCell, GateError> {
        self.tokens
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(GateError::NotFound)
    }

    fn cell_by_code(&self, code: &str) -> Result<TokenCell, GateError> {
        let id = self
            .by_code
            .get(&normalize_code(code))
            .map(|r| *r.value())
            .ok_or(GateError::NotFound)?;
        self.cell_by_id(id)
    }

    async fn lock<'a>(&self, cell: &'a TokenCell) -> Result<MutexGuard<'a, Token>, GateError> {
        tokio::time::timeout(self.ctx.lock_timeout, cell.lock())
            .await
            .map_err(|_| GateError::Busy)
    }

    /// Token by scanned code, with its effective status. Never writes.
    pub async fn lookup(&self, code: &str) -> Result<Token, GateError> {
        let cell = self.cell_by_code(code)?;
        let tok = self.lock(&cell).await?;
        Ok(tok.as_of(self.ctx.clock.now(), self.ttl))
    }

    pub async fn get(&self, id: Uuid) -> Result<Token, GateError> {
        let cell = self.cell_by_id(id)?;
        let tok = self.lock(&cell).await?;
        Ok(tok.as_of(self.ctx.clock.now(), self.ttl))
    }

    /// ACTIVE -> USED. The status check and the write happen under the same
    /// lock, so of two racing scans exactly one succeeds.
    pub async fn mark_used(&self, id: Uuid) -> Result<Token, GateError> {
        let cell = self.cell_by_id(id)?;
        let mut tok = self.lock(&cell).await?;
        // deleted while we waited for the lock
        if !self.tokens.contains_key(&id) {
            return Err(GateError::NotFound);
        }
        match tok.effective_status(self.ctx.clock.now(), self.ttl) {
            TokenStatus::Active => {
                tok.status = TokenStatus::Used;
                self.ctx.journal.record(JournalRecord::Token(tok.clone()));
                tracing::info!(code = %tok.code, "token marked used");
                Ok(tok.clone())
            }
            other => Err(GateError::InvalidTransition {
                entity: "token",
                from: other.as_str(),
                to: TokenStatus::Used.as_str(),
            }),
        }
    }

    /// Persist ACTIVE -> EXPIRED for tokens past their TTL. Reads already
    /// report these as expired; this only makes storage and reports agree.
    /// Tokens whose lock is contended are left for the next sweep.
    pub async fn expire_stale(&self) -> usize {
        let now = self.ctx.clock.now();
        let cells: Vec<TokenCell> = self.tokens.iter().map(|e| e.value().clone()).collect();
        let mut expired = 0;
        for cell in cells {
            let Ok(mut tok) = self.lock(&cell).await else {
                continue;
            };
            if tok.status == TokenStatus::Active
                && tok.effective_status(now, self.ttl) == TokenStatus::Expired
                && self.tokens.contains_key(&tok.id)
            {
                tok.status = TokenStatus::Expired;
                self.ctx.journal.record(JournalRecord::Token(tok.clone()));
                expired += 1;
            }
        }
        if expired > 0 {
            tracing::info!(count = expired, "expired stale tokens");
        }
        expired
    }

    /// Every live token with effective status, oldest first.
    pub async fn list(&self) -> Result<Vec<Token>, GateError> {
        let now = self.ctx.clock.now();
        let cells: Vec<TokenCell> = self.tokens.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            let tok = self.lock(&cell).await?;
            out.push(tok.as_of(now, self.ttl));
        }
        out.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.code.cmp(&b.code)));
        Ok(out)
    }

    /// Administrative override: drop a token from the registry. The code
    /// stays retired and is never reissued.
    pub async fn delete(&self, code: &str, actor: &str) -> Result<Token, GateError> {
        let cell = self.cell_by_code(code)?;
        let removed = {
            let tok = self.lock(&cell).await?;
            if self.tokens.remove(&tok.id).is_none() {
                return Err(GateError::NotFound);
            }
            self.ctx.journal.record(JournalRecord::TokenDeleted(tok.id));
            tok.as_of(self.ctx.clock.now(), self.ttl)
        };
        self.ctx
            .audit
            .record(
                AuditKind::TokenDeleted,
                AuditNote {
                    actor: Some(actor.to_string()),
                    token_code: Some(removed.code.clone()),
                    detail: format!(
                        "{:?} token for {} deleted while {}",
                        removed.kind,
                        removed.subject,
                        removed.status.as_str()
                    ),
                    ..Default::default()
                },
            )
            .await;
        Ok(removed)
    }
}

// ── Tests ───────────────────────────────────────────────────────
