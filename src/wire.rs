use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
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
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{AularioAuthSource, Capability, capability_for_user};
use crate::engine::Engine;
use crate::model::*;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

pub struct AularioHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<AularioQueryParser>,
}

impl AularioHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(AularioQueryParser),
        }
    }

    /// Tenant = campus, named by the pgwire `database` startup parameter.
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

    fn capability_of<C: ClientInfo>(&self, client: &C) -> Capability {
        capability_for_user(client.metadata().get("user").map(String::as_str))
    }

    async fn run(
        &self,
        engine: &Engine,
        capability: Capability,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = crate::observability::command_label(&cmd);
        let start = std::time::Instant::now();
        let result = self.execute_command(engine, capability, cmd).await;
        metrics::histogram!(crate::observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        metrics::counter!(
            crate::observability::QUERIES_TOTAL,
            "command" => label,
            "status" => if result.is_ok() { "ok" } else { "error" }
        )
        .increment(1);
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        capability: Capability,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        if capability == Capability::ReadOnly && is_write(&cmd) {
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "42501".into(),
                "scheduling-write capability required".into(),
            ))));
        }

        match cmd {
            Command::InsertRoom {
                id,
                name,
                capacity,
                building,
            } => {
                engine
                    .create_room(id, name, capacity, building)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::UpdateRoom {
                id,
                name,
                capacity,
                building,
            } => {
                engine
                    .update_room(id, name, capacity, building)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteRoom { id } => {
                engine.delete_room(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertModule {
                ordinal,
                start_min,
                end_min,
            } => {
                engine
                    .define_module(ordinal, start_min, end_min)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertExam {
                id,
                subject,
                modules_required,
            } => {
                engine
                    .create_exam(id, subject, modules_required)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteExam { id } => {
                engine.delete_exam(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertReservations { exam, placements } => {
                let count = placements.len();
                engine.schedule(exam, placements).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(
                    Tag::new("INSERT").with_rows(count),
                )])
            }
            Command::MoveReservation {
                id,
                room_id,
                date,
                ordinals,
            } => {
                engine
                    .move_reservation(id, room_id, date, ordinals)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::ConfirmReservation { id } => {
                engine.confirm_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteReservation { id } => {
                engine.cancel_reservation(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectRooms { id } => {
                let rooms: Vec<RoomInfo> = match id {
                    Some(id) => engine
                        .list_rooms()
                        .into_iter()
                        .filter(|r| r.id == id)
                        .collect(),
                    None => engine.list_rooms(),
                };
                let schema = Arc::new(rooms_schema());
                let rows: Vec<PgWireResult<_>> = rooms
                    .into_iter()
                    .map(|room| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&room.id.to_string())?;
                        encoder.encode_field(&room.name)?;
                        encoder.encode_field(&(room.capacity as i64))?;
                        encoder.encode_field(&room.building)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectModules => {
                let slots = engine.list_modules().await;
                let schema = Arc::new(modules_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(slot.ordinal as i64))?;
                        encoder.encode_field(&(slot.start_min as i64))?;
                        encoder.encode_field(&(slot.end_min as i64))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectExams { id } => {
                let exams = match id {
                    Some(id) => vec![engine.get_exam(id).map_err(engine_err)?],
                    None => engine.list_exams(),
                };
                let schema = Arc::new(exams_schema());
                let rows: Vec<PgWireResult<_>> = exams
                    .into_iter()
                    .map(|exam| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&exam.id.to_string())?;
                        encoder.encode_field(&exam.subject)?;
                        encoder.encode_field(&(exam.modules_required as i64))?;
                        encoder.encode_field(&status_label(exam.status))?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations { room_id, date } => {
                let reservations = engine
                    .list_reservations(room_id, date)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = reservations
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.exam_id.to_string())?;
                        encoder.encode_field(&r.room_id.to_string())?;
                        encoder.encode_field(&r.date.format("%Y-%m-%d").to_string())?;
                        encoder.encode_field(&ordinals_literal(&r.ordinals))?;
                        encoder.encode_field(&r.confirmed)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectAvailability { room_id, date, run } => {
                let slots = engine
                    .availability(room_id, date, run)
                    .await
                    .map_err(engine_err)?;
                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&(slot.ordinal as i64))?;
                        encoder.encode_field(&(slot.start_min as i64))?;
                        encoder.encode_field(&(slot.end_min as i64))?;
                        encoder.encode_field(&if slot.occupied { "occupied" } else { "free" })?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                let room_id_str = channel.strip_prefix("room_").ok_or_else(|| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("invalid channel: {channel} (expected room_{{id}})"),
                    )))
                })?;
                let _room_id = Ulid::from_string(room_id_str).map_err(|e| {
                    PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("bad ULID in channel: {e}"),
                    )))
                })?;
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn is_write(cmd: &Command) -> bool {
    matches!(
        cmd,
        Command::InsertRoom { .. }
            | Command::UpdateRoom { .. }
            | Command::DeleteRoom { .. }
            | Command::InsertModule { .. }
            | Command::InsertExam { .. }
            | Command::DeleteExam { .. }
            | Command::InsertReservations { .. }
            | Command::MoveReservation { .. }
            | Command::ConfirmReservation { .. }
            | Command::DeleteReservation { .. }
    )
}

fn status_label(status: ExamStatus) -> &'static str {
    match status {
        ExamStatus::Unscheduled => "unscheduled",
        ExamStatus::Scheduled => "scheduled",
    }
}

fn ordinals_literal(ordinals: &[u16]) -> String {
    let inner: Vec<String> = ordinals.iter().map(|o| o.to_string()).collect();
    format!("{{{}}}", inner.join(","))
}

fn varchar(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn rooms_schema() -> Vec<FieldInfo> {
    vec![varchar("id"), varchar("name"), int8("capacity"), varchar("building")]
}

fn modules_schema() -> Vec<FieldInfo> {
    vec![int8("ordinal"), int8("start_min"), int8("end_min")]
}

fn exams_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("subject"),
        int8("modules_required"),
        varchar("status"),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        varchar("id"),
        varchar("exam_id"),
        varchar("room_id"),
        varchar("date"),
        varchar("modules"),
        FieldInfo::new("confirmed".into(), None, None, Type::BOOL, FieldFormat::Text),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        int8("ordinal"),
        int8("start_min"),
        int8("end_min"),
        varchar("status"),
    ]
}

/// Result schema for a statement, best-effort from the table keyword. Used
/// by Describe before the statement runs.
fn schema_for_statement(sql: &str) -> Vec<FieldInfo> {
    let upper = sql.to_uppercase();
    if !upper.contains("SELECT") {
        return vec![];
    }
    if upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("EXAMS") {
        exams_schema()
    } else if upper.contains("MODULES") {
        modules_schema()
    } else if upper.contains("ROOMS") {
        rooms_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl SimpleQueryHandler for AularioHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let capability = self.capability_of(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.run(&engine, capability, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct AularioQueryParser;

#[async_trait]
impl QueryParser for AularioQueryParser {
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
        Ok(schema_for_statement(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for AularioHandler {
    type Statement = String;
    type QueryParser = AularioQueryParser;

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
        let capability = self.capability_of(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(&engine, capability, cmd).await?;
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
            schema_for_statement(&target.statement),
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
        Ok(DescribePortalResponse::new(schema_for_statement(
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
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
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

pub struct AularioFactory {
    handler: Arc<AularioHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<AularioAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl AularioFactory {
    pub fn new(
        tenant_manager: Arc<TenantManager>,
        password: String,
        readonly_password: Option<String>,
    ) -> Self {
        let auth_source = AularioAuthSource::new(password, readonly_password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(AularioHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for AularioFactory {
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

/// Serve one pgwire connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    readonly_password: Option<String>,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> Result<(), std::io::Error> {
    let factory = Arc::new(AularioFactory::new(
        tenant_manager,
        password,
        readonly_password,
    ));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

fn engine_err(e: crate::engine::EngineError) -> PgWireError {
    use crate::engine::EngineError;
    let code = match &e {
        EngineError::SlotTaken { .. } => "23505",
        EngineError::Selection(_) => "23514",
        _ => "P0001",
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
