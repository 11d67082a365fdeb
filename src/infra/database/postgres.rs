//! PostgreSQL repository implementations.
//!
//! One client backs every repository trait so that multi-entity writes
//! (a status transition plus its webhook fan-out) can share a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use crate::domain::{
    AppError, DatabaseError, EventType, Invoice, InvoiceRepository, InvoiceStatus,
    NewWebhookEvent, PaginatedResponse, Payment, PaymentRepository, PaymentStatus, Refund,
    RefundRepository, RefundStatus, RetryPolicy, TransitionError, ValidationError,
    WebhookEndpoint, WebhookEndpointRepository, WebhookEvent, WebhookEventRepository,
    types::{AttemptDisposition, AttemptOutcome},
};

/// PostgreSQL connection pool configuration
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Duration,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 2,
            acquire_timeout: Duration::from_secs(3),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
        }
    }
}

/// PostgreSQL client with connection pooling
pub struct PostgresClient {
    pool: PgPool,
}

impl PostgresClient {
    /// Create a new PostgreSQL client with custom configuration
    pub async fn new(database_url: &str, config: PostgresConfig) -> Result<Self, AppError> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(database_url)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        info!("Connected to PostgreSQL");
        Ok(Self { pool })
    }

    /// Create a new PostgreSQL client with default configuration
    pub async fn with_defaults(database_url: &str) -> Result<Self, AppError> {
        Self::new(database_url, PostgresConfig::default()).await
    }

    /// Run database migrations using sqlx migrate
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Migration(e.to_string())))?;
        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying connection pool (for testing)
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_payment(row: &sqlx::postgres::PgRow) -> Result<Payment, AppError> {
        let status: String = row.get("status");
        Ok(Payment {
            id: row.get("id"),
            merchant_ref: row.get("merchant_ref"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            status: status.parse().unwrap_or(PaymentStatus::Created),
            payer_address: row.get("payer_address"),
            merchant_address: row.get("merchant_address"),
            tx_hash: row.get("tx_hash"),
            settlement_duration_secs: row.get("settlement_duration_secs"),
            expires_at: row.get("expires_at"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_invoice(row: &sqlx::postgres::PgRow) -> Result<Invoice, AppError> {
        let status: String = row.get("status");
        Ok(Invoice {
            id: row.get("id"),
            merchant_ref: row.get("merchant_ref"),
            payment_id: row.get("payment_id"),
            invoice_number: row.get("invoice_number"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            status: status.parse().unwrap_or(InvoiceStatus::Draft),
            customer_name: row.get("customer_name"),
            customer_email: row.get("customer_email"),
            due_date: row.get("due_date"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_refund(row: &sqlx::postgres::PgRow) -> Result<Refund, AppError> {
        let status: String = row.get("status");
        Ok(Refund {
            id: row.get("id"),
            payment_id: row.get("payment_id"),
            merchant_ref: row.get("merchant_ref"),
            amount: row.get("amount"),
            currency: row.get("currency"),
            status: status.parse().unwrap_or(RefundStatus::Pending),
            tx_hash: row.get("tx_hash"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_endpoint(row: &sqlx::postgres::PgRow) -> Result<WebhookEndpoint, AppError> {
        let event_types: Vec<String> = row.get("event_types");
        let event_types = event_types
            .iter()
            .map(|s| s.parse())
            .collect::<Result<Vec<EventType>, _>>()
            .map_err(AppError::Serialization)?;
        Ok(WebhookEndpoint {
            id: row.get("id"),
            merchant_ref: row.get("merchant_ref"),
            url: row.get("url"),
            event_types,
            secret: row.get("secret"),
            active: row.get("active"),
            consecutive_failures: row.get("consecutive_failures"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<WebhookEvent, AppError> {
        let delivery_status: String = row.get("delivery_status");
        let event_type: String = row.get("event_type");
        Ok(WebhookEvent {
            id: row.get("id"),
            endpoint_id: row.get("endpoint_id"),
            event_type: event_type.parse().map_err(AppError::Serialization)?,
            payload: row.get("payload"),
            delivery_status: delivery_status.parse().unwrap_or_default(),
            attempts: row.get("attempts"),
            last_attempt_at: row.get("last_attempt_at"),
            response_code: row.get("response_code"),
            response_body: row.get("response_body"),
            next_attempt_at: row.get("next_attempt_at"),
            in_flight_at: row.get("in_flight_at"),
            idempotency_key: row.get("idempotency_key"),
            created_at: row.get("created_at"),
        })
    }

    /// Insert webhook events inside an open transaction. The unique
    /// idempotency key makes re-inserts for the same logical transition
    /// no-ops, so a retried caller cannot duplicate fan-out.
    async fn insert_events_tx(
        tx: &mut Transaction<'_, Postgres>,
        events: &[NewWebhookEvent],
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO webhook_events (
                    id, endpoint_id, event_type, payload, delivery_status,
                    attempts, idempotency_key, created_at
                )
                VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6)
                ON CONFLICT (idempotency_key) DO NOTHING
                "#,
            )
            .bind(&event.id)
            .bind(&event.endpoint_id)
            .bind(event.event_type.as_str())
            .bind(&event.payload)
            .bind(&event.idempotency_key)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        }
        Ok(())
    }

    /// Cursor pagination shared by the list queries: resolve the cursor row's
    /// created_at, fetch limit+1 newest-first, emit next_cursor when more remain.
    async fn cursor_created_at(
        &self,
        table: &str,
        cursor_id: &str,
    ) -> Result<DateTime<Utc>, AppError> {
        let query = format!("SELECT created_at FROM {table} WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(cursor_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(row.get("created_at")),
            None => Err(AppError::Validation(ValidationError::InvalidField {
                field: "cursor".to_string(),
                message: "Invalid cursor".to_string(),
            })),
        }
    }
}

const PAYMENT_COLUMNS: &str = r#"id, merchant_ref, amount, currency, status, payer_address,
       merchant_address, tx_hash, settlement_duration_secs, expires_at,
       version, created_at, updated_at"#;

const EVENT_COLUMNS: &str = r#"id, endpoint_id, event_type, payload, delivery_status, attempts,
       last_attempt_at, response_code, response_body, next_attempt_at,
       in_flight_at, idempotency_key, created_at"#;

#[async_trait]
impl PaymentRepository for PostgresClient {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self, payment, events), fields(id = %payment.id, merchant = %payment.merchant_ref))]
    async fn insert_payment(
        &self,
        payment: &Payment,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, merchant_ref, amount, currency, status, payer_address,
                merchant_address, tx_hash, settlement_duration_secs, expires_at,
                version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(&payment.id)
        .bind(&payment.merchant_ref)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.status.as_str())
        .bind(&payment.payer_address)
        .bind(&payment.merchant_address)
        .bind(&payment.tx_hash)
        .bind(payment.settlement_duration_secs)
        .bind(payment.expires_at)
        .bind(payment.version)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::insert_events_tx(&mut tx, events, payment.created_at).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, id: &str) -> Result<Option<Payment>, AppError> {
        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(Some(Self::row_to_payment(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_payments(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Payment>, AppError> {
        let limit = limit.clamp(1, 100);
        // Fetch one extra to determine if there are more items
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_created_at = self.cursor_created_at("payments", cursor_id).await?;
                let query = format!(
                    r#"
                    SELECT {PAYMENT_COLUMNS}
                    FROM payments
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                );
                sqlx::query(&query)
                    .bind(cursor_created_at)
                    .bind(cursor_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {PAYMENT_COLUMNS}
                    FROM payments
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#
                );
                sqlx::query(&query)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
        };

        let has_more = rows.len() > limit as usize;
        let payments: Vec<Payment> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_payment)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if has_more {
            payments.last().map(|p| p.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(payments, next_cursor, has_more))
    }

    #[instrument(skip(self, events), fields(target = %target))]
    async fn apply_transition(
        &self,
        id: &str,
        target: PaymentStatus,
        tx_hash: Option<&str>,
        settlement_duration_secs: Option<i64>,
        expected_version: i32,
        events: &[NewWebhookEvent],
    ) -> Result<Payment, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        let query = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        let current = Self::row_to_payment(&row)?;

        if current.version != expected_version {
            return Err(AppError::Transition(TransitionError::ConcurrentModification {
                id: id.to_string(),
                expected: expected_version,
            }));
        }
        // tx_hash is write-once
        if let (Some(incoming), Some(existing)) = (tx_hash, current.tx_hash.as_deref()) {
            if incoming != existing {
                return Err(AppError::Transition(TransitionError::TxHashAlreadySet(
                    id.to_string(),
                )));
            }
        }

        let now = Utc::now();
        let query = format!(
            r#"
            UPDATE payments
            SET status = $1,
                tx_hash = COALESCE(tx_hash, $2),
                settlement_duration_secs = COALESCE($3, settlement_duration_secs),
                version = version + 1,
                updated_at = $4
            WHERE id = $5
            RETURNING {PAYMENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(target.as_str())
            .bind(tx_hash)
            .bind(settlement_duration_secs)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        let updated = Self::row_to_payment(&row)?;

        // Fan-out commits with the status update or not at all
        Self::insert_events_tx(&mut tx, events, now).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(updated)
    }
}

const INVOICE_COLUMNS: &str = r#"id, merchant_ref, payment_id, invoice_number, amount, currency,
       status, customer_name, customer_email, due_date, created_at, updated_at"#;

#[async_trait]
impl InvoiceRepository for PostgresClient {
    #[instrument(skip(self, invoice, events), fields(id = %invoice.id, number = %invoice.invoice_number))]
    async fn insert_invoice(
        &self,
        invoice: &Invoice,
        events: &[NewWebhookEvent],
    ) -> Result<(), AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, merchant_ref, payment_id, invoice_number, amount, currency,
                status, customer_name, customer_email, due_date, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&invoice.id)
        .bind(&invoice.merchant_ref)
        .bind(&invoice.payment_id)
        .bind(&invoice.invoice_number)
        .bind(invoice.amount)
        .bind(&invoice.currency)
        .bind(invoice.status.as_str())
        .bind(&invoice.customer_name)
        .bind(&invoice.customer_email)
        .bind(invoice.due_date)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        Self::insert_events_tx(&mut tx, events, invoice.created_at).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, id: &str) -> Result<Option<Invoice>, AppError> {
        let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(Some(Self::row_to_invoice(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_invoices(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<Invoice>, AppError> {
        let limit = limit.clamp(1, 100);
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_created_at = self.cursor_created_at("invoices", cursor_id).await?;
                let query = format!(
                    r#"
                    SELECT {INVOICE_COLUMNS}
                    FROM invoices
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                );
                sqlx::query(&query)
                    .bind(cursor_created_at)
                    .bind(cursor_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {INVOICE_COLUMNS}
                    FROM invoices
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#
                );
                sqlx::query(&query)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
        };

        let has_more = rows.len() > limit as usize;
        let invoices: Vec<Invoice> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_invoice)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if has_more {
            invoices.last().map(|i| i.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(invoices, next_cursor, has_more))
    }

    #[instrument(skip(self, events), fields(target = %target))]
    async fn apply_transition(
        &self,
        id: &str,
        target: InvoiceStatus,
        payment_id: Option<&str>,
        events: &[NewWebhookEvent],
    ) -> Result<Invoice, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        let query = format!("SELECT {INVOICE_COLUMNS} FROM invoices WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        let current = Self::row_to_invoice(&row)?;

        // Re-validate under lock so concurrent callers cannot both apply
        if !current.status.can_transition_to(target) {
            return Err(AppError::Transition(TransitionError::InvalidTransition {
                from: current.status.to_string(),
                to: target.to_string(),
            }));
        }

        let now = Utc::now();
        let query = format!(
            r#"
            UPDATE invoices
            SET status = $1,
                payment_id = COALESCE($2, payment_id),
                updated_at = $3
            WHERE id = $4
            RETURNING {INVOICE_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(target.as_str())
            .bind(payment_id)
            .bind(now)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        let updated = Self::row_to_invoice(&row)?;

        Self::insert_events_tx(&mut tx, events, now).await?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(updated)
    }
}

#[async_trait]
impl RefundRepository for PostgresClient {
    #[instrument(skip(self, refund), fields(id = %refund.id, payment = %refund.payment_id))]
    async fn insert_refund(&self, refund: &Refund) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO refunds (
                id, payment_id, merchant_ref, amount, currency, status,
                tx_hash, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&refund.id)
        .bind(&refund.payment_id)
        .bind(&refund.merchant_ref)
        .bind(refund.amount)
        .bind(&refund.currency)
        .bind(refund.status.as_str())
        .bind(&refund.tx_hash)
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_refund(&self, id: &str) -> Result<Option<Refund>, AppError> {
        let row = sqlx::query(
            r#"
            SELECT id, payment_id, merchant_ref, amount, currency, status,
                   tx_hash, created_at, updated_at
            FROM refunds
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(Some(Self::row_to_refund(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_refunds_for_payment(&self, payment_id: &str) -> Result<Vec<Refund>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id, payment_id, merchant_ref, amount, currency, status,
                   tx_hash, created_at, updated_at
            FROM refunds
            WHERE payment_id = $1
            ORDER BY created_at ASC
            "#,
        )
        .bind(payment_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        rows.iter().map(Self::row_to_refund).collect()
    }

    #[instrument(skip(self))]
    async fn update_status(
        &self,
        id: &str,
        status: RefundStatus,
        tx_hash: Option<&str>,
    ) -> Result<Refund, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE refunds
            SET status = $1,
                tx_hash = COALESCE($2, tx_hash),
                updated_at = NOW()
            WHERE id = $3
            RETURNING id, payment_id, merchant_ref, amount, currency, status,
                      tx_hash, created_at, updated_at
            "#,
        )
        .bind(status.as_str())
        .bind(tx_hash)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        Self::row_to_refund(&row)
    }
}

const ENDPOINT_COLUMNS: &str = r#"id, merchant_ref, url, event_types, secret, active,
       consecutive_failures, created_at, updated_at"#;

#[async_trait]
impl WebhookEndpointRepository for PostgresClient {
    #[instrument(skip(self, endpoint), fields(id = %endpoint.id, merchant = %endpoint.merchant_ref))]
    async fn insert_endpoint(&self, endpoint: &WebhookEndpoint) -> Result<(), AppError> {
        let event_types: Vec<String> = endpoint
            .event_types
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        sqlx::query(
            r#"
            INSERT INTO webhook_endpoints (
                id, merchant_ref, url, event_types, secret, active,
                consecutive_failures, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&endpoint.id)
        .bind(&endpoint.merchant_ref)
        .bind(&endpoint.url)
        .bind(&event_types)
        .bind(&endpoint.secret)
        .bind(endpoint.active)
        .bind(endpoint.consecutive_failures)
        .bind(endpoint.created_at)
        .bind(endpoint.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::from(e)))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_endpoint(&self, id: &str) -> Result<Option<WebhookEndpoint>, AppError> {
        let query = format!("SELECT {ENDPOINT_COLUMNS} FROM webhook_endpoints WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(Some(Self::row_to_endpoint(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_endpoints(
        &self,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEndpoint>, AppError> {
        let limit = limit.clamp(1, 100);
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_created_at =
                    self.cursor_created_at("webhook_endpoints", cursor_id).await?;
                let query = format!(
                    r#"
                    SELECT {ENDPOINT_COLUMNS}
                    FROM webhook_endpoints
                    WHERE (created_at, id) < ($1, $2)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3
                    "#
                );
                sqlx::query(&query)
                    .bind(cursor_created_at)
                    .bind(cursor_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {ENDPOINT_COLUMNS}
                    FROM webhook_endpoints
                    ORDER BY created_at DESC, id DESC
                    LIMIT $1
                    "#
                );
                sqlx::query(&query)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
        };

        let has_more = rows.len() > limit as usize;
        let endpoints: Vec<WebhookEndpoint> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_endpoint)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if has_more {
            endpoints.last().map(|e| e.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(endpoints, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn subscribed_endpoints(
        &self,
        merchant_ref: &str,
        event_type: EventType,
    ) -> Result<Vec<WebhookEndpoint>, AppError> {
        let query = format!(
            r#"
            SELECT {ENDPOINT_COLUMNS}
            FROM webhook_endpoints
            WHERE merchant_ref = $1
              AND active
              AND $2 = ANY(event_types)
            ORDER BY created_at ASC
            "#
        );
        let rows = sqlx::query(&query)
            .bind(merchant_ref)
            .bind(event_type.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        rows.iter().map(Self::row_to_endpoint).collect()
    }

    #[instrument(skip(self))]
    async fn set_active(&self, id: &str, active: bool) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET active = $1,
                consecutive_failures = CASE WHEN $1 THEN 0 ELSE consecutive_failures END,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(active)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        if result.rows_affected() == 0 {
            return Err(AppError::Database(DatabaseError::NotFound(id.to_string())));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn record_delivery_result(
        &self,
        id: &str,
        success: bool,
        failure_threshold: i32,
    ) -> Result<bool, AppError> {
        let row = sqlx::query(
            r#"
            UPDATE webhook_endpoints
            SET consecutive_failures = CASE WHEN $1 THEN 0 ELSE consecutive_failures + 1 END,
                active = CASE
                    WHEN NOT $1 AND consecutive_failures + 1 >= $2 THEN FALSE
                    ELSE active
                END,
                updated_at = NOW()
            WHERE id = $3
            RETURNING active
            "#,
        )
        .bind(success)
        .bind(failure_threshold)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(id.to_string())))?;
        let active: bool = row.get("active");
        Ok(!active)
    }
}

#[async_trait]
impl WebhookEventRepository for PostgresClient {
    #[instrument(skip(self, event), fields(endpoint = %event.endpoint_id, event_type = %event.event_type))]
    async fn create_event(&self, event: &NewWebhookEvent) -> Result<WebhookEvent, AppError> {
        let now = Utc::now();
        let query = format!(
            r#"
            INSERT INTO webhook_events (
                id, endpoint_id, event_type, payload, delivery_status,
                attempts, idempotency_key, created_at
            )
            VALUES ($1, $2, $3, $4, 'pending', 0, $5, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&query)
            .bind(&event.id)
            .bind(&event.endpoint_id)
            .bind(event.event_type.as_str())
            .bind(&event.payload)
            .bind(&event.idempotency_key)
            .bind(now)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::from(e)))?;

        if let Some(row) = inserted {
            return Self::row_to_event(&row);
        }

        // Conflict: the same logical transition already materialized this event
        let query =
            format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE idempotency_key = $1");
        let row = sqlx::query(&query)
            .bind(&event.idempotency_key)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Self::row_to_event(&row)
    }

    #[instrument(skip(self))]
    async fn get_event(&self, id: &str) -> Result<Option<WebhookEvent>, AppError> {
        let query = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        match row {
            Some(row) => Ok(Some(Self::row_to_event(&row)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_events_for_endpoint(
        &self,
        endpoint_id: &str,
        limit: i64,
        cursor: Option<&str>,
    ) -> Result<PaginatedResponse<WebhookEvent>, AppError> {
        let limit = limit.clamp(1, 100);
        let fetch_limit = limit + 1;

        let rows = match cursor {
            Some(cursor_id) => {
                let cursor_created_at =
                    self.cursor_created_at("webhook_events", cursor_id).await?;
                let query = format!(
                    r#"
                    SELECT {EVENT_COLUMNS}
                    FROM webhook_events
                    WHERE endpoint_id = $1 AND (created_at, id) < ($2, $3)
                    ORDER BY created_at DESC, id DESC
                    LIMIT $4
                    "#
                );
                sqlx::query(&query)
                    .bind(endpoint_id)
                    .bind(cursor_created_at)
                    .bind(cursor_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
            None => {
                let query = format!(
                    r#"
                    SELECT {EVENT_COLUMNS}
                    FROM webhook_events
                    WHERE endpoint_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2
                    "#
                );
                sqlx::query(&query)
                    .bind(endpoint_id)
                    .bind(fetch_limit)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            }
        };

        let has_more = rows.len() > limit as usize;
        let events: Vec<WebhookEvent> = rows
            .iter()
            .take(limit as usize)
            .map(Self::row_to_event)
            .collect::<Result<Vec<_>, _>>()?;
        let next_cursor = if has_more {
            events.last().map(|e| e.id.clone())
        } else {
            None
        };

        Ok(PaginatedResponse::new(events, next_cursor, has_more))
    }

    #[instrument(skip(self))]
    async fn claim_next_deliverable(
        &self,
        limit: i64,
        now: DateTime<Utc>,
        visibility_timeout: Duration,
        max_attempts: i32,
    ) -> Result<Vec<WebhookEvent>, AppError> {
        let stale_cutoff = now
            - chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(120));

        // Per-endpoint FIFO: `oldest` picks each active endpoint's oldest
        // undelivered event; the outer select keeps only those eligible right
        // now, skips endpoints with a live in-flight claim, and takes row
        // locks so concurrent claimants cannot double-claim. A claim older
        // than the visibility timeout counts as abandoned and is re-claimed.
        let query = format!(
            r#"
            WITH oldest AS (
                SELECT DISTINCT ON (e.endpoint_id) e.id
                FROM webhook_events e
                JOIN webhook_endpoints ep ON ep.id = e.endpoint_id AND ep.active
                WHERE e.delivery_status = 'pending'
                   OR (e.delivery_status = 'failed'
                       AND e.attempts < $3
                       AND e.next_attempt_at IS NOT NULL)
                ORDER BY e.endpoint_id, e.created_at ASC, e.id ASC
            ),
            claimable AS (
                SELECT e.id AS event_id
                FROM webhook_events e
                JOIN oldest o ON o.id = e.id
                WHERE (e.in_flight_at IS NULL OR e.in_flight_at <= $2)
                  AND (e.delivery_status = 'pending' OR e.next_attempt_at <= $1)
                  AND NOT EXISTS (
                      SELECT 1 FROM webhook_events live
                      WHERE live.endpoint_id = e.endpoint_id
                        AND live.in_flight_at > $2
                  )
                ORDER BY e.created_at ASC, e.id ASC
                LIMIT $4
                FOR UPDATE OF e SKIP LOCKED
            )
            UPDATE webhook_events w
            SET in_flight_at = $1
            FROM claimable c
            WHERE w.id = c.event_id
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let rows = sqlx::query(&query)
            .bind(now)
            .bind(stale_cutoff)
            .bind(max_attempts)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        rows.iter().map(Self::row_to_event).collect()
    }

    #[instrument(skip(self, outcome, policy))]
    async fn record_attempt(
        &self,
        event_id: &str,
        outcome: &AttemptOutcome,
        policy: &RetryPolicy,
        now: DateTime<Utc>,
    ) -> Result<WebhookEvent, AppError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Connection(e.to_string())))?;

        let query = format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1 FOR UPDATE");
        let row = sqlx::query(&query)
            .bind(event_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?
            .ok_or_else(|| AppError::Database(DatabaseError::NotFound(event_id.to_string())))?;
        let current = Self::row_to_event(&row)?;

        let attempts = current.attempts + 1;
        let (status, next_attempt_at) = match policy.disposition(outcome, attempts, now) {
            AttemptDisposition::Delivered => ("delivered", None),
            AttemptDisposition::Retry { next_attempt_at } => ("failed", Some(next_attempt_at)),
            AttemptDisposition::TerminalFailure => ("failed", None),
        };
        // Transport errors have no response body; keep the error text for audit
        let response_body = outcome
            .response_body
            .clone()
            .or_else(|| outcome.error.clone());

        let query = format!(
            r#"
            UPDATE webhook_events
            SET delivery_status = $1,
                attempts = $2,
                last_attempt_at = $3,
                response_code = $4,
                response_body = $5,
                next_attempt_at = $6,
                in_flight_at = NULL
            WHERE id = $7
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(status)
            .bind(attempts)
            .bind(now)
            .bind(outcome.response_code)
            .bind(response_body)
            .bind(next_attempt_at)
            .bind(event_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        let updated = Self::row_to_event(&row)?;

        tx.commit()
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn replay_event(&self, id: &str) -> Result<WebhookEvent, AppError> {
        let query = format!(
            r#"
            UPDATE webhook_events
            SET delivery_status = 'pending',
                attempts = 0,
                next_attempt_at = NULL,
                in_flight_at = NULL
            WHERE id = $1
              AND delivery_status = 'failed'
              AND next_attempt_at IS NULL
            RETURNING {EVENT_COLUMNS}
            "#
        );
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AppError::Database(DatabaseError::Query(e.to_string())))?;

        match row {
            Some(row) => Self::row_to_event(&row),
            None => {
                // Distinguish "unknown event" from "not terminally failed"
                match WebhookEventRepository::get_event(self, id).await? {
                    Some(_) => Err(AppError::Validation(ValidationError::InvalidField {
                        field: "delivery_status".to_string(),
                        message: "Only terminally failed events can be replayed".to_string(),
                    })),
                    None => Err(AppError::Database(DatabaseError::NotFound(id.to_string()))),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_config_default() {
        let config = PostgresConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 2);
        assert_eq!(config.acquire_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(600));
        assert_eq!(config.max_lifetime, Duration::from_secs(1800));
    }

    #[test]
    fn test_postgres_config_custom() {
        let config = PostgresConfig {
            max_connections: 20,
            min_connections: 5,
            acquire_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(300),
            max_lifetime: Duration::from_secs(3600),
        };
        assert_eq!(config.max_connections, 20);
        assert_eq!(config.min_connections, 5);
    }
}
