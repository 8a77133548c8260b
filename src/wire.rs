use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use ulid::Ulid;

use crate::auth::NidoAuthSource;
use crate::engine::{Actor, Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct NidoHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<NidoQueryParser>,
}

impl NidoHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(NidoQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("tenant error: {e}"),
            )))
        })
    }

    /// The `user` startup parameter doubles as the actor claim:
    /// `parent_<ulid>`, `caregiver_<ulid>`, or `admin`. The Identity Service
    /// in front of us vouches for it; we only enforce what each role may do.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Actor> {
        let user = client
            .metadata()
            .get("user")
            .cloned()
            .unwrap_or_default();
        parse_actor(&user).ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "28000".into(),
                format!("bad user: {user} (expected parent_<ulid>, caregiver_<ulid>, or admin)"),
            )))
        })
    }

    async fn run_command(
        &self,
        engine: &Engine,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        actor: &Actor,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        match cmd {
            Command::InsertSlot {
                id,
                caregiver_id,
                start,
                end,
                capacity,
                rate,
                recurrence,
                notes,
            } => {
                engine
                    .create_slot(
                        actor,
                        id,
                        caregiver_id,
                        Span { start, end },
                        capacity,
                        rate,
                        recurrence,
                        notes,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateSlot { id, update } => {
                engine.update_slot(actor, id, update).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteSlot { id } => {
                engine.delete_slot(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservation {
                id,
                slot_id,
                children,
                spots,
            } => {
                engine
                    .reserve_spots(actor, id, slot_id, children, spots)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBooking {
                id,
                slot_id,
                children,
                address,
                reservation_id,
            } => {
                engine
                    .create_slot_booking(actor, id, slot_id, children, address, reservation_id)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertDirectBooking {
                id,
                caregiver_id,
                start,
                end,
                children,
                rate,
                address,
                confirmed,
            } => {
                engine
                    .create_direct_booking(
                        actor,
                        id,
                        caregiver_id,
                        Span { start, end },
                        children,
                        rate,
                        address,
                        confirmed,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBooking { id } => {
                engine.cancel_booking(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertPaymentEvent {
                booking_id,
                succeeded,
            } => {
                engine
                    .apply_payment_event(actor, booking_id, succeeded)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectSlots { filter } => {
                Ok(vec![slot_rows(engine.query_slots(&filter))])
            }
            Command::SelectAvailableSlots { filter } => {
                Ok(vec![slot_rows(engine.available_slots(&filter))])
            }
            Command::SelectRealtimeAvailability { caregiver_id, day } => {
                let avail = engine.realtime_availability(caregiver_id, day);
                let schema = Arc::new(realtime_schema());
                let totals = (
                    avail.total_slots_available as i64,
                    avail.total_spots_available as i64,
                );
                let rows: Vec<PgWireResult<_>> = avail
                    .slots
                    .into_iter()
                    .map(|s| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&s.slot_id.to_string())?;
                        encoder.encode_field(&s.start)?;
                        encoder.encode_field(&s.end)?;
                        encoder.encode_field(&(s.available_spots as i64))?;
                        encoder.encode_field(&(s.realtime_available as i64))?;
                        // Aggregates repeat per row so the extended protocol's
                        // single result set carries them too.
                        encoder.encode_field(&totals.0)?;
                        encoder.encode_field(&totals.1)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations { slot_id } => {
                let holds = engine
                    .get_reservations(actor, slot_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(reservation_schema());
                let rows: Vec<PgWireResult<_>> = holds
                    .into_iter()
                    .map(|h| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&h.id.to_string())?;
                        encoder.encode_field(&h.slot_id.to_string())?;
                        encoder.encode_field(&h.parent_id.to_string())?;
                        encoder.encode_field(&(h.children_count as i64))?;
                        encoder.encode_field(&(h.reserved_spots as i64))?;
                        encoder.encode_field(&h.status.as_str())?;
                        encoder.encode_field(&h.expires_at)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectBookings { caregiver_id } => {
                let bookings = engine
                    .get_bookings(actor, caregiver_id)
                    .map_err(engine_err)?;
                let schema = Arc::new(booking_schema());
                let rows: Vec<PgWireResult<_>> = bookings
                    .into_iter()
                    .map(|b| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&b.id.to_string())?;
                        encoder.encode_field(&b.parent_id.to_string())?;
                        encoder.encode_field(&b.caregiver_id.to_string())?;
                        encoder.encode_field(&b.start)?;
                        encoder.encode_field(&b.end)?;
                        encoder.encode_field(&(b.children_count as i64))?;
                        encoder.encode_field(&b.status.as_str())?;
                        encoder.encode_field(&b.total_amount)?;
                        encoder.encode_field(&b.platform_fee)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectDrift { caregiver_id } => {
                actor.require_admin("drift reports").map_err(engine_err)?;
                let reports = engine.find_drifted_slots(caregiver_id);
                let schema = Arc::new(drift_schema());
                let rows: Vec<PgWireResult<_>> = reports
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.slot_id.to_string())?;
                        encoder.encode_field(&r.caregiver_id.to_string())?;
                        encoder.encode_field(&(r.stored_occupancy as i64))?;
                        encoder.encode_field(&(r.actual_occupancy as i64))?;
                        encoder.encode_field(&(r.stored_available as i64))?;
                        encoder.encode_field(&(r.expected_available as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::ReconcileSlot { id } => {
                actor.require_admin("reconcile").map_err(engine_err)?;
                let changed = engine.reconcile_slot(id).await.map_err(engine_err)?;
                let corrected = changed as usize;
                metrics::counter!(observability::DRIFT_SLOTS_CORRECTED_TOTAL)
                    .increment(corrected as u64);
                Ok(vec![Response::Execution(
                    Tag::new("RECONCILE").with_rows(corrected),
                )])
            }
            Command::ReconcileCaregiver { id } => {
                actor.require_admin("reconcile").map_err(engine_err)?;
                let corrected = engine.reconcile_caregiver(id).await;
                metrics::counter!(observability::DRIFT_SLOTS_CORRECTED_TOTAL)
                    .increment(corrected as u64);
                Ok(vec![Response::Execution(
                    Tag::new("RECONCILE").with_rows(corrected),
                )])
            }
            Command::ReconcileAll => {
                actor.require_admin("reconcile").map_err(engine_err)?;
                let corrected = engine.reconcile_all().await;
                metrics::counter!(observability::DRIFT_SLOTS_CORRECTED_TOTAL)
                    .increment(corrected as u64);
                Ok(vec![Response::Execution(
                    Tag::new("RECONCILE").with_rows(corrected),
                )])
            }
            Command::Repair { booking_id } => {
                let slot_id = engine
                    .reconcile_orphaned_booking(actor, booking_id)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(repair_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&booking_id.to_string())?;
                encoder.encode_field(&slot_id.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                // Validates the topic and registers the broadcast channel so
                // in-process subscribers see events for it.
                let topic = parse_channel(&channel)?;
                engine.notify.subscribe(topic);
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
            Command::Unlisten { channel } => {
                parse_channel(&channel)?;
                Ok(vec![Response::Execution(Tag::new("UNLISTEN"))])
            }
            Command::UnlistenAll => Ok(vec![Response::Execution(Tag::new("UNLISTEN"))]),
        }
    }
}

fn parse_actor(user: &str) -> Option<Actor> {
    if user == "admin" {
        return Some(Actor::Admin);
    }
    if let Some(id) = user.strip_prefix("parent_") {
        return Ulid::from_string(id).ok().map(Actor::Parent);
    }
    if let Some(id) = user.strip_prefix("caregiver_") {
        return Ulid::from_string(id).ok().map(Actor::Caregiver);
    }
    None
}

fn parse_channel(channel: &str) -> PgWireResult<Ulid> {
    let id_str = channel
        .strip_prefix("slot_")
        .or_else(|| channel.strip_prefix("caregiver_"))
        .ok_or_else(|| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "42000".into(),
                format!("invalid channel: {channel} (expected slot_{{id}} or caregiver_{{id}})"),
            )))
        })?;
    Ulid::from_string(id_str).map_err(|e| {
        PgWireError::UserError(Box::new(ErrorInfo::new(
            "ERROR".into(),
            "42000".into(),
            format!("bad ULID in channel: {e}"),
        )))
    })
}

fn slot_rows(slots: Vec<SlotInfo>) -> Response {
    let schema = Arc::new(slot_schema());
    let rows: Vec<PgWireResult<_>> = slots
        .into_iter()
        .map(|s| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&s.id.to_string())?;
            encoder.encode_field(&s.caregiver_id.to_string())?;
            encoder.encode_field(&s.day)?;
            encoder.encode_field(&s.start)?;
            encoder.encode_field(&s.end)?;
            encoder.encode_field(&(s.total_capacity as i64))?;
            encoder.encode_field(&(s.current_occupancy as i64))?;
            encoder.encode_field(&(s.available_spots as i64))?;
            encoder.encode_field(&s.base_rate)?;
            encoder.encode_field(&s.current_rate)?;
            encoder.encode_field(&s.status.as_str())?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn text_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8_field(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn slot_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("caregiver_id"),
        int8_field("day"),
        int8_field("start"),
        int8_field("end"),
        int8_field("total_capacity"),
        int8_field("current_occupancy"),
        int8_field("available_spots"),
        int8_field("base_rate"),
        int8_field("current_rate"),
        text_field("status"),
    ]
}

fn reservation_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("slot_id"),
        text_field("parent_id"),
        int8_field("children_count"),
        int8_field("reserved_spots"),
        text_field("status"),
        int8_field("expires_at"),
    ]
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id"),
        text_field("parent_id"),
        text_field("caregiver_id"),
        int8_field("start"),
        int8_field("end"),
        int8_field("children_count"),
        text_field("status"),
        int8_field("total_amount"),
        int8_field("platform_fee"),
    ]
}

fn realtime_schema() -> Vec<FieldInfo> {
    vec![
        text_field("slot_id"),
        int8_field("start"),
        int8_field("end"),
        int8_field("available_spots"),
        int8_field("realtime_available"),
        int8_field("total_slots_available"),
        int8_field("total_spots_available"),
    ]
}

fn drift_schema() -> Vec<FieldInfo> {
    vec![
        text_field("slot_id"),
        text_field("caregiver_id"),
        int8_field("stored_occupancy"),
        int8_field("actual_occupancy"),
        int8_field("stored_available"),
        int8_field("expected_available"),
    ]
}

fn repair_schema() -> Vec<FieldInfo> {
    vec![text_field("booking_id"), text_field("slot_id")]
}

/// Schema for a statement, by the table it reads. Mutations have none.
fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if upper.trim_start().starts_with("REPAIR ") {
        return repair_schema();
    }
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("REALTIME_AVAILABILITY") {
        realtime_schema()
    } else if upper.contains("AVAILABLE_SLOTS") || upper.contains("SLOTS") {
        slot_schema()
    } else if upper.contains("RESERVATIONS") {
        reservation_schema()
    } else if upper.contains("BOOKINGS") {
        booking_schema()
    } else if upper.contains("DRIFT") {
        drift_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for NidoHandler {
    async fn do_query<C>(
        &self,
        client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run_command(&engine, &actor, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct NidoQueryParser;

#[async_trait]
impl QueryParser for NidoQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for NidoHandler {
    type Statement = String;
    type QueryParser = NidoQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run_command(&engine, &actor, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start {
                if let Ok(n) = sql[start..i].parse::<usize>() {
                    if n > max {
                        max = n;
                    }
                }
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct NidoFactory {
    handler: Arc<NidoHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<NidoAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl NidoFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        let auth_source = NidoAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(NidoHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for NidoFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Drive one client connection through the pgwire state machine.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = NidoFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Map EngineError to a SQLSTATE the client can switch on.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidRange { .. } => "22007",
        EngineError::NotOwner(_) | EngineError::Forbidden(_) => "42501",
        EngineError::InsufficientCapacity { .. } => "53400",
        EngineError::HasDependents(_) => "23503",
        EngineError::SlotClosed(_) => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_parsing() {
        assert_eq!(parse_actor("admin"), Some(Actor::Admin));
        assert!(matches!(
            parse_actor("parent_01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            Some(Actor::Parent(_))
        ));
        assert!(matches!(
            parse_actor("caregiver_01ARZ3NDEKTSV4RRFFQ69G5FAV"),
            Some(Actor::Caregiver(_))
        ));
        assert_eq!(parse_actor("postgres"), None);
        assert_eq!(parse_actor("parent_nope"), None);
    }

    #[test]
    fn statement_schema_by_table() {
        assert_eq!(
            statement_schema("SELECT * FROM realtime_availability WHERE caregiver_id = $1 AND day = $2").len(),
            realtime_schema().len()
        );
        assert_eq!(
            statement_schema("SELECT * FROM available_slots").len(),
            slot_schema().len()
        );
        assert_eq!(
            statement_schema("SELECT * FROM drift").len(),
            drift_schema().len()
        );
        assert!(statement_schema("INSERT INTO slots (id) VALUES ('x')").is_empty());
    }

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM bookings WHERE caregiver_id = $1"), 1);
        assert_eq!(count_params("UPDATE slots SET capacity = $2 WHERE id = $1"), 2);
        assert_eq!(count_params("RECONCILE ALL"), 0);
    }
}
