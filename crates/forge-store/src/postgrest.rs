//! PostgREST store backend.
//!
//! Guarded updates are `PATCH` requests whose filter includes the expected
//! prior state, sent with `Prefer: return=representation`. An empty result
//! array means the guard rejected the write. Operations that touch more
//! than one row atomically are calls to stored functions under `/rpc`.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use forge_core::{
    BuildingId, BuildingStatus, Character, CharacterDungeon, CharacterId, DungeonEvent, DungeonRun,
    EnrollmentId, RunId, Trade, TradeId, TradeStatus, UserId,
};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{StoreError, StoreResult};
use crate::repository::{BalanceStore, DungeonStore, TradeStore};

/// Default timeout for store requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const TRADES: &str = "trades";
const BUILDINGS: &str = "buildings";
const CHARACTERS: &str = "characters";
const RUNS: &str = "dungeon_runs";
const ENROLLMENTS: &str = "character_dungeons";
const EVENTS: &str = "dungeon_events";
const BALANCES: &str = "user_balances";

const RPC_ENROLL: &str = "enroll_character_if_absent";
const RPC_RECORD_DAMAGE: &str = "record_dungeon_damage";
const RPC_CREDIT: &str = "credit_balance";
const RPC_UNSYNCED_RESOLUTIONS: &str = "find_unsynced_resolutions";

/// Connection settings for a PostgREST endpoint.
#[derive(Debug, Clone)]
pub struct PostgrestConfig {
    /// REST root, e.g. `https://project.supabase.co/rest/v1`.
    pub url: String,
    /// Service key sent as `apikey` and bearer token.
    pub api_key: String,
    pub timeout: Duration,
}

impl PostgrestConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

// ============================================================================
// Query
// ============================================================================

/// PostgREST query string builder (`column=op.value` pairs).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Display) -> Self {
        self.pairs.push((column.to_string(), format!("eq.{value}")));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.pairs.push((column.to_string(), "is.null".to_string()));
        self
    }

    pub fn not_null(mut self, column: &str) -> Self {
        self.pairs
            .push((column.to_string(), "not.is.null".to_string()));
        self
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.pairs.push(("select".to_string(), columns.to_string()));
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.pairs
            .push(("order".to_string(), format!("{column}.desc")));
        self
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.pairs.push(("order".to_string(), format!("{column}.asc")));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.pairs.push(("limit".to_string(), n.to_string()));
        self
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }
}

/// Timestamp as the store compares it: microsecond precision, `Z` suffix.
pub fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ============================================================================
// Client
// ============================================================================

#[derive(Debug, Deserialize)]
struct BalanceRow {
    balance: u64,
}

#[derive(Debug, Serialize)]
struct RecordDamageArgs {
    p_enrollment_id: EnrollmentId,
    p_damage: u64,
    p_reward: u64,
    p_at: String,
}

#[derive(Debug, Serialize)]
struct CreditArgs {
    p_user_id: UserId,
    p_amount: u64,
}

#[derive(Debug, Serialize)]
struct EnrollArgs<'a> {
    p_enrollment: &'a CharacterDungeon,
}

/// Store backed by a PostgREST endpoint.
pub struct PostgrestStore {
    client: Client,
    base_url: String,
}

impl PostgrestStore {
    pub fn new(config: &PostgrestConfig) -> StoreResult<Self> {
        if config.url.is_empty() {
            return Err(StoreError::InvalidConfig("store url is empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| StoreError::InvalidConfig(format!("invalid api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| StoreError::InvalidConfig(format!("invalid api key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| StoreError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.base_url)
    }

    fn rpc_url(&self, function: &str) -> String {
        format!("{}/rpc/{function}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> StoreResult<Response> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &Query) -> StoreResult<Vec<T>> {
        trace!(table, query = ?query.pairs(), "select");
        let response = self
            .send(self.client.get(self.table_url(table)).query(query.pairs()))
            .await?;
        Ok(response.json().await?)
    }

    /// Guarded PATCH; returns the rows that matched the filter.
    async fn update<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        body: &Value,
    ) -> StoreResult<Vec<T>> {
        trace!(table, query = ?query.pairs(), "update");
        let response = self
            .send(
                self.client
                    .patch(self.table_url(table))
                    .query(query.pairs())
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .await?;
        Ok(response.json().await?)
    }

    async fn insert<B: Serialize + Sync + ?Sized>(&self, table: &str, body: &B) -> StoreResult<()> {
        self.send(
            self.client
                .post(self.table_url(table))
                .header("Prefer", "return=minimal")
                .json(body),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, table: &str, query: &Query) -> StoreResult<u64> {
        let response = self
            .send(
                self.client
                    .delete(self.table_url(table))
                    .query(query.pairs())
                    .header("Prefer", "return=representation"),
            )
            .await?;
        let rows: Vec<Value> = response.json().await?;
        Ok(rows.len() as u64)
    }

    async fn rpc<A: Serialize + Sync, T: DeserializeOwned>(
        &self,
        function: &str,
        args: &A,
    ) -> StoreResult<T> {
        debug!(function, "rpc");
        let response = self
            .send(self.client.post(self.rpc_url(function)).json(args))
            .await?;
        Ok(response.json().await?)
    }

    async fn guarded_trade_patch(
        &self,
        id: TradeId,
        from: TradeStatus,
        body: Value,
    ) -> StoreResult<bool> {
        let query = Query::new().eq("id", id).eq("status", from);
        let rows: Vec<Value> = self.update(TRADES, &query, &body).await?;
        Ok(!rows.is_empty())
    }
}

// ============================================================================
// TradeStore
// ============================================================================

#[async_trait]
impl TradeStore for PostgrestStore {
    async fn find_active_trades(&self) -> StoreResult<Vec<Trade>> {
        self.find_trades_by_status(TradeStatus::Active).await
    }

    async fn find_trades_by_status(&self, status: TradeStatus) -> StoreResult<Vec<Trade>> {
        let query = Query::new().eq("status", status).order_asc("created_at");
        self.select(TRADES, &query).await
    }

    async fn find_by_id(&self, id: TradeId) -> StoreResult<Option<Trade>> {
        let query = Query::new().eq("id", id).limit(1);
        let rows: Vec<Trade> = self.select(TRADES, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_status(
        &self,
        id: TradeId,
        from: TradeStatus,
        to: TradeStatus,
    ) -> StoreResult<bool> {
        let to = from.transition(to)?;
        self.guarded_trade_patch(id, from, json!({ "status": to }))
            .await
    }

    async fn resolve_completion(
        &self,
        id: TradeId,
        reward: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let body = json!({
            "status": TradeStatus::Completed,
            "reward": reward,
            "resolved_at": timestamp(at),
            "claim_state": "unclaimed",
        });
        self.guarded_trade_patch(id, TradeStatus::Active, body).await
    }

    async fn resolve_liquidation(&self, id: TradeId, at: DateTime<Utc>) -> StoreResult<bool> {
        let body = json!({
            "status": TradeStatus::Liquidated,
            "reward": 0,
            "resolved_at": timestamp(at),
            "claim_state": "not_applicable",
        });
        self.guarded_trade_patch(id, TradeStatus::Active, body).await
    }

    async fn find_unsynced_resolutions(&self) -> StoreResult<Vec<Trade>> {
        // Needs a join against buildings and each building's latest trade.
        self.rpc(RPC_UNSYNCED_RESOLUTIONS, &json!({})).await
    }

    async fn update_building_status(
        &self,
        id: BuildingId,
        from: BuildingStatus,
        to: BuildingStatus,
    ) -> StoreResult<bool> {
        let to = from.transition(to)?;
        let query = Query::new().eq("id", id).eq("status", from);
        let rows: Vec<Value> = self
            .update(BUILDINGS, &query, &json!({ "status": to }))
            .await?;
        Ok(!rows.is_empty())
    }
}

// ============================================================================
// DungeonStore
// ============================================================================

#[async_trait]
impl DungeonStore for PostgrestStore {
    async fn list_characters(&self) -> StoreResult<Vec<Character>> {
        let query = Query::new().select("id,user_id,damage_rating");
        self.select(CHARACTERS, &query).await
    }

    async fn create_run(&self, run: &DungeonRun) -> StoreResult<()> {
        self.insert(RUNS, run).await
    }

    async fn find_open_run(&self) -> StoreResult<Option<DungeonRun>> {
        let query = Query::new()
            .is_null("finished_at")
            .order_desc("started_at")
            .limit(1);
        let rows: Vec<DungeonRun> = self.select(RUNS, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn finish_run(&self, id: RunId, at: DateTime<Utc>) -> StoreResult<bool> {
        let query = Query::new().eq("id", id).is_null("finished_at");
        let rows: Vec<Value> = self
            .update(RUNS, &query, &json!({ "finished_at": timestamp(at) }))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn create_enrollment_if_absent(
        &self,
        enrollment: &CharacterDungeon,
    ) -> StoreResult<bool> {
        let args = EnrollArgs {
            p_enrollment: enrollment,
        };
        self.rpc(RPC_ENROLL, &args).await
    }

    async fn find_enrollment(&self, id: EnrollmentId) -> StoreResult<Option<CharacterDungeon>> {
        let query = Query::new().eq("id", id).limit(1);
        let rows: Vec<CharacterDungeon> = self.select(ENROLLMENTS, &query).await?;
        Ok(rows.into_iter().next())
    }

    async fn list_open_enrollments(&self, run_id: RunId) -> StoreResult<Vec<CharacterDungeon>> {
        let query = Query::new()
            .eq("run_id", run_id)
            .is_null("finished_at")
            .order_asc("joined_at");
        self.select(ENROLLMENTS, &query).await
    }

    async fn list_claimable(
        &self,
        character_id: CharacterId,
    ) -> StoreResult<Vec<CharacterDungeon>> {
        let query = Query::new()
            .eq("character_id", character_id)
            .not_null("finished_at")
            .is_null("claimed_at")
            .order_asc("joined_at");
        self.select(ENROLLMENTS, &query).await
    }

    async fn finish_enrollments(&self, run_id: RunId, at: DateTime<Utc>) -> StoreResult<u64> {
        let query = Query::new().eq("run_id", run_id).is_null("finished_at");
        let rows: Vec<Value> = self
            .update(ENROLLMENTS, &query, &json!({ "finished_at": timestamp(at) }))
            .await?;
        Ok(rows.len() as u64)
    }

    async fn record_damage(
        &self,
        enrollment_id: EnrollmentId,
        damage: u64,
        reward: u64,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let args = RecordDamageArgs {
            p_enrollment_id: enrollment_id,
            p_damage: damage,
            p_reward: reward,
            p_at: timestamp(at),
        };
        self.rpc(RPC_RECORD_DAMAGE, &args).await
    }

    async fn claim_enrollment(
        &self,
        id: EnrollmentId,
        user_id: UserId,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<CharacterDungeon>> {
        let query = Query::new()
            .eq("id", id)
            .eq("user_id", user_id)
            .not_null("finished_at")
            .is_null("claimed_at");
        let rows: Vec<CharacterDungeon> = self
            .update(ENROLLMENTS, &query, &json!({ "claimed_at": timestamp(at) }))
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn release_claim(
        &self,
        id: EnrollmentId,
        claimed_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let query = Query::new()
            .eq("id", id)
            .eq("claimed_at", timestamp(claimed_at));
        let rows: Vec<Value> = self
            .update(ENROLLMENTS, &query, &json!({ "claimed_at": Value::Null }))
            .await?;
        Ok(!rows.is_empty())
    }

    async fn list_events(&self, enrollment_id: EnrollmentId) -> StoreResult<Vec<DungeonEvent>> {
        let query = Query::new()
            .eq("enrollment_id", enrollment_id)
            .order_asc("created_at");
        self.select(EVENTS, &query).await
    }

    async fn purge_events(&self, enrollment_id: EnrollmentId) -> StoreResult<u64> {
        let query = Query::new().eq("enrollment_id", enrollment_id);
        self.delete(EVENTS, &query).await
    }
}

// ============================================================================
// BalanceStore
// ============================================================================

#[async_trait]
impl BalanceStore for PostgrestStore {
    async fn credit(&self, user_id: UserId, amount: u64) -> StoreResult<u64> {
        self.rpc(
            RPC_CREDIT,
            &CreditArgs {
                p_user_id: user_id,
                p_amount: amount,
            },
        )
        .await
    }

    async fn balance(&self, user_id: UserId) -> StoreResult<u64> {
        let query = Query::new().eq("user_id", user_id).select("balance");
        let rows: Vec<BalanceRow> = match self.select(BALANCES, &query).await {
            Ok(rows) => rows,
            Err(StoreError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        Ok(rows.first().map(|r| r.balance).unwrap_or(0))
    }
}
