//! Relational store toolkit (`database` server).
//!
//! One lazily opened pool per dialect. SQLite runs on a single connection, so
//! writes are serialized; MySQL gets a small pool when a URL is configured.

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, ColumnIndex, Decode, Row, Type, ValueRef};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::dispatch::{CallContext, CapabilityProvider, ProviderError, ToolBinding};
use crate::tools::{Arguments, ParamKind, ParameterSpec, ToolDescriptor};
use crate::types::DatabaseConfig;

/// Statements whose leading keyword means "returns rows".
const READ_PREFIXES: &[&str] = &["SELECT", "WITH", "PRAGMA", "SHOW", "DESCRIBE", "VALUES"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dialect {
    Sqlite,
    MySql,
}

impl Dialect {
    fn parse(name: &str) -> Result<Self, ProviderError> {
        match name {
            "sqlite" => Ok(Dialect::Sqlite),
            "mysql" => Ok(Dialect::MySql),
            other => Err(ProviderError::permanent(format!("Unsupported database type: {}", other))),
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::MySql => "mysql",
        }
    }
}

// =============================================================================
// Shared store
// =============================================================================

/// Pools shared by every database tool.
#[derive(Debug)]
pub struct SqlStore {
    config: DatabaseConfig,
    sqlite: Mutex<Option<SqlitePool>>,
    mysql: Mutex<Option<MySqlPool>>,
    suspect: AtomicBool,
}

impl SqlStore {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            sqlite: Mutex::new(None),
            mysql: Mutex::new(None),
            suspect: AtomicBool::new(false),
        }
    }

    fn mark_suspect(&self) {
        self.suspect.store(true, Ordering::SeqCst);
    }

    /// Close every open pool if a call was abandoned since the last acquisition.
    async fn recycle_if_suspect(&self) {
        if !self.suspect.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::warn!("recycling database pools after an abandoned call");
        // take the pools out first; close() waits on checked-out connections
        let sqlite = self.sqlite.lock().await.take();
        if let Some(pool) = sqlite {
            pool.close().await;
        }
        let mysql = self.mysql.lock().await.take();
        if let Some(pool) = mysql {
            pool.close().await;
        }
    }

    async fn sqlite(&self) -> Result<SqlitePool, ProviderError> {
        self.recycle_if_suspect().await;
        let mut slot = self.sqlite.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let options = SqliteConnectOptions::from_str(&self.config.sqlite_url)
            .map_err(|e| ProviderError::permanent(format!("invalid SQLite URL: {}", e)))?
            .create_if_missing(true);
        if let Some(parent) = options.get_filename().parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    ProviderError::permanent(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(self.config.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| sql_error(Dialect::Sqlite, e))?;
        tracing::info!(url = %self.config.sqlite_url, "opened SQLite pool");
        *slot = Some(pool.clone());
        Ok(pool)
    }

    async fn mysql(&self) -> Result<MySqlPool, ProviderError> {
        self.recycle_if_suspect().await;
        let Some(url) = self.config.mysql_url.as_deref() else {
            return Err(ProviderError::permanent(
                "MySQL is not configured (set backends.database.mysql_url)",
            ));
        };
        let mut slot = self.mysql.lock().await;
        if let Some(pool) = slot.as_ref() {
            return Ok(pool.clone());
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(self.config.mysql_max_connections)
            .acquire_timeout(self.config.acquire_timeout)
            .connect(url)
            .await
            .map_err(|e| sql_error(Dialect::MySql, e))?;
        tracing::info!("opened MySQL pool");
        *slot = Some(pool.clone());
        Ok(pool)
    }

    /// Run one statement with positional string parameters.
    async fn run(
        &self,
        dialect: Dialect,
        sql: &str,
        params: &[String],
        ctx: &CallContext,
    ) -> Result<Value, ProviderError> {
        let reads = returns_rows(sql);
        match dialect {
            Dialect::Sqlite => {
                let pool = ctx.guard(self.sqlite()).await??;
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(param.as_str());
                }
                if reads {
                    let rows = ctx
                        .guard(query.fetch_all(&pool))
                        .await?
                        .map_err(|e| sql_error(dialect, e))?;
                    Ok(render_rows(&rows))
                } else {
                    let done = ctx
                        .guard(query.execute(&pool))
                        .await?
                        .map_err(|e| sql_error(dialect, e))?;
                    Ok(json!({ "rows_affected": done.rows_affected() }))
                }
            }
            Dialect::MySql => {
                let pool = ctx.guard(self.mysql()).await??;
                let mut query = sqlx::query(sql);
                for param in params {
                    query = query.bind(param.as_str());
                }
                if reads {
                    let rows = ctx
                        .guard(query.fetch_all(&pool))
                        .await?
                        .map_err(|e| sql_error(dialect, e))?;
                    Ok(render_rows(&rows))
                } else {
                    let done = ctx
                        .guard(query.execute(&pool))
                        .await?
                        .map_err(|e| sql_error(dialect, e))?;
                    Ok(json!({ "rows_affected": done.rows_affected() }))
                }
            }
        }
    }

    async fn init_sample_data(&self, ctx: &CallContext) -> Result<Value, ProviderError> {
        let pool = ctx.guard(self.sqlite()).await??;
        ctx.guard(seed_sqlite(&pool))
            .await?
            .map_err(|e| sql_error(Dialect::Sqlite, e))?;
        tracing::info!("sample data initialized");
        Ok(json!({
            "database": "sqlite",
            "location": self.config.sqlite_url,
            "tables": {"customers": 5, "products": 5, "orders": 6},
        }))
    }
}

fn returns_rows(sql: &str) -> bool {
    let body = skip_leading_comments(sql);
    let head: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    READ_PREFIXES.contains(&head.as_str())
        || body
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .any(|word| word.eq_ignore_ascii_case("RETURNING"))
}

/// Drop leading whitespace and `--` / `/* */` comments.
fn skip_leading_comments(sql: &str) -> &str {
    let mut rest = sql.trim_start();
    loop {
        if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, tail)| tail).trim_start();
        } else if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, tail)| tail).trim_start();
        } else {
            return rest;
        }
    }
}

/// Connectivity problems are worth retrying; SQL errors are not.
fn sql_error(dialect: Dialect, err: sqlx::Error) -> ProviderError {
    let message = format!("{} error: {}", dialect.as_str(), err);
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => ProviderError::retryable(message),
        _ => ProviderError::permanent(message),
    }
}

fn render_rows<R>(rows: &[R]) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
{
    let columns: Vec<String> = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rendered: Vec<Value> = rows
        .iter()
        .map(|row| Value::Array((0..row.columns().len()).map(|i| convert_cell(row, i)).collect()))
        .collect();

    json!({
        "columns": columns,
        "row_count": rendered.len(),
        "rows": rendered,
    })
}

/// Best-effort rendering of a single cell as a string; NULL stays null.
fn convert_cell<R>(row: &R, index: usize) -> Value
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
    for<'r> f64: Decode<'r, R::Database> + Type<R::Database>,
{
    if row.try_get_raw(index).map(|r| r.is_null()).unwrap_or(true) {
        return Value::Null;
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Value::String(s);
    }
    if let Ok(n) = row.try_get::<i64, _>(index) {
        return Value::String(n.to_string());
    }
    if let Ok(f) = row.try_get::<f64, _>(index) {
        return Value::String(f.to_string());
    }
    // DECIMAL and friends arrive as text on the wire
    if let Ok(s) = row.try_get_unchecked::<String, _>(index) {
        return Value::String(s);
    }
    Value::String("UNSUPPORTED_TYPE".to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn seed_sqlite(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await?;
    for statement in [
        "DROP TABLE IF EXISTS orders",
        "DROP TABLE IF EXISTS customers",
        "DROP TABLE IF EXISTS products",
        "CREATE TABLE customers (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT UNIQUE NOT NULL,
            city TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        "CREATE TABLE products (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            price DECIMAL(10, 2) NOT NULL,
            category TEXT,
            stock INTEGER DEFAULT 0
        )",
        "CREATE TABLE orders (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            customer_id INTEGER,
            product_id INTEGER,
            quantity INTEGER NOT NULL,
            order_date DATETIME DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (customer_id) REFERENCES customers (id),
            FOREIGN KEY (product_id) REFERENCES products (id)
        )",
    ] {
        sqlx::query(statement).execute(&mut *tx).await?;
    }

    for (name, email, city) in [
        ("John Doe", "john@example.com", "New York"),
        ("Jane Smith", "jane@example.com", "Los Angeles"),
        ("Mike Johnson", "mike@example.com", "Chicago"),
        ("Sarah Williams", "sarah@example.com", "Houston"),
        ("David Brown", "david@example.com", "Phoenix"),
    ] {
        sqlx::query("INSERT INTO customers (name, email, city) VALUES (?, ?, ?)")
            .bind(name)
            .bind(email)
            .bind(city)
            .execute(&mut *tx)
            .await?;
    }

    for (name, price, category, stock) in [
        ("Laptop", 999.99, "Electronics", 50),
        ("Smartphone", 699.99, "Electronics", 100),
        ("Desk Chair", 199.99, "Furniture", 25),
        ("Coffee Mug", 15.99, "Kitchen", 200),
        ("Notebook", 5.99, "Stationery", 150),
    ] {
        sqlx::query("INSERT INTO products (name, price, category, stock) VALUES (?, ?, ?, ?)")
            .bind(name)
            .bind(price)
            .bind(category)
            .bind(stock as i64)
            .execute(&mut *tx)
            .await?;
    }

    for (customer_id, product_id, quantity) in [(1, 1, 2), (2, 2, 1), (3, 3, 5), (1, 4, 3), (4, 1, 1), (5, 5, 10)] {
        sqlx::query("INSERT INTO orders (customer_id, product_id, quantity) VALUES (?, ?, ?)")
            .bind(customer_id as i64)
            .bind(product_id as i64)
            .bind(quantity as i64)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await
}

// =============================================================================
// Tools
// =============================================================================

#[derive(Debug, Clone, Copy)]
enum DatabaseOp {
    ExecuteQuery,
    ListTables,
    DescribeTable,
    InitSampleData,
}

#[derive(Debug)]
struct DatabaseTool {
    store: Arc<SqlStore>,
    op: DatabaseOp,
}

#[async_trait]
impl CapabilityProvider for DatabaseTool {
    async fn invoke(&self, args: Arguments, ctx: CallContext) -> Result<Value, ProviderError> {
        let dialect = Dialect::parse(args.str("database")?)?;
        match self.op {
            DatabaseOp::ExecuteQuery => {
                let query = args.str("query")?;
                if query.trim().is_empty() {
                    return Err(ProviderError::permanent("Query cannot be empty"));
                }
                self.store.run(dialect, query, args.str_list("params")?, &ctx).await
            }
            DatabaseOp::ListTables => {
                let sql = match dialect {
                    Dialect::Sqlite => {
                        "SELECT name FROM sqlite_master WHERE type = 'table' \
                         AND name NOT LIKE 'sqlite_%' ORDER BY name"
                    }
                    Dialect::MySql => "SHOW TABLES",
                };
                let listing = self.store.run(dialect, sql, &[], &ctx).await?;
                let tables: Vec<Value> = listing["rows"]
                    .as_array()
                    .map(|rows| rows.iter().filter_map(|row| row.get(0).cloned()).collect())
                    .unwrap_or_default();
                Ok(json!({ "database": dialect.as_str(), "tables": tables }))
            }
            DatabaseOp::DescribeTable => {
                let table = args.str("table_name")?;
                if !is_identifier(table) {
                    return Err(ProviderError::permanent(format!("Invalid table name: {:?}", table)));
                }
                let sql = match dialect {
                    Dialect::Sqlite => format!("PRAGMA table_info({})", table),
                    Dialect::MySql => format!("DESCRIBE {}", table),
                };
                let mut described = self.store.run(dialect, &sql, &[], &ctx).await?;
                if described["row_count"] == 0 {
                    return Err(ProviderError::permanent(format!("Table not found: {}", table)));
                }
                if let Value::Object(fields) = &mut described {
                    fields.insert("table".to_string(), json!(table));
                }
                Ok(described)
            }
            DatabaseOp::InitSampleData => match dialect {
                Dialect::Sqlite => self.store.init_sample_data(&ctx).await,
                Dialect::MySql => Err(ProviderError::permanent(
                    "MySQL sample data initialization is not supported; use sqlite",
                )),
            },
        }
    }

    fn mark_suspect(&self) {
        self.store.mark_suspect();
    }
}

fn database_param() -> ParameterSpec {
    ParameterSpec::optional("database", ParamKind::String, "Database type (sqlite or mysql)")
        .with_default(json!("sqlite"))
        .one_of(["sqlite", "mysql"])
}

/// Tool bindings for the relational store.
pub fn toolkit(config: DatabaseConfig) -> Vec<ToolBinding> {
    let store = Arc::new(SqlStore::new(config));
    let tool = |op| -> Arc<dyn CapabilityProvider> {
        Arc::new(DatabaseTool {
            store: store.clone(),
            op,
        })
    };

    vec![
        ToolBinding::new(
            ToolDescriptor::new("execute_query", "Execute a SQL query on the database")
                .param(ParameterSpec::required("query", ParamKind::String, "SQL query to execute"))
                .param(database_param())
                .param(
                    ParameterSpec::optional(
                        "params",
                        ParamKind::ArrayOfString,
                        "Parameters for prepared statements",
                    )
                    .with_default(json!([])),
                ),
            tool(DatabaseOp::ExecuteQuery),
        ),
        ToolBinding::new(
            ToolDescriptor::new("list_tables", "List all tables in the database").param(database_param()),
            tool(DatabaseOp::ListTables),
        ),
        ToolBinding::new(
            ToolDescriptor::new("describe_table", "Get table schema information")
                .param(ParameterSpec::required(
                    "table_name",
                    ParamKind::String,
                    "Name of the table to describe",
                ))
                .param(database_param()),
            tool(DatabaseOp::DescribeTable),
        ),
        ToolBinding::new(
            ToolDescriptor::new("init_sample_data", "Initialize database with sample tables and data")
                .param(database_param()),
            tool(DatabaseOp::InitSampleData),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::call;

    struct Fixture {
        _dir: tempfile::TempDir,
        tools: Vec<ToolBinding>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("sample.db");
        let config = DatabaseConfig {
            sqlite_url: format!("sqlite://{}?mode=rwc", path.display()),
            ..DatabaseConfig::default()
        };
        Fixture {
            _dir: dir,
            tools: toolkit(config),
        }
    }

    impl Fixture {
        async fn call(&self, tool: &str, raw: Value) -> Result<Value, ProviderError> {
            call(&self.tools, tool, raw).await
        }
    }

    #[test]
    fn test_returns_rows_prefixes() {
        assert!(returns_rows("  select * from t"));
        assert!(returns_rows("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(returns_rows("PRAGMA table_info(t)"));
        assert!(!returns_rows("INSERT INTO t VALUES (1)"));
        assert!(!returns_rows("SELECTED"));
    }

    #[test]
    fn test_returns_rows_after_comments_and_returning() {
        assert!(returns_rows("-- top customers\nSELECT * FROM customers"));
        assert!(returns_rows("/* report */ /* v2 */\n  select 1"));
        assert!(returns_rows("VALUES (1, 'a'), (2, 'b')"));
        assert!(returns_rows("INSERT INTO t (name) VALUES ('x') RETURNING id"));
        assert!(!returns_rows("-- SELECT\nDELETE FROM t"));
        assert!(!returns_rows("/* unterminated SELECT"));
    }

    #[test]
    fn test_identifier_check() {
        assert!(is_identifier("customers"));
        assert!(is_identifier("_tmp2"));
        assert!(!is_identifier("2fast"));
        assert!(!is_identifier("users; DROP TABLE x"));
        assert!(!is_identifier(""));
    }

    #[tokio::test]
    async fn test_sample_data_then_query() {
        let f = fixture();
        let seeded = f.call("init_sample_data", json!({})).await.unwrap();
        assert_eq!(seeded["tables"]["orders"], 6);

        let tables = f.call("list_tables", json!({})).await.unwrap();
        assert_eq!(tables["tables"], json!(["customers", "orders", "products"]));

        let result = f
            .call(
                "execute_query",
                json!({"query": "SELECT name, city FROM customers WHERE city = ?", "params": ["Chicago"]}),
            )
            .await
            .unwrap();
        assert_eq!(result["columns"], json!(["name", "city"]));
        assert_eq!(result["rows"], json!([["Mike Johnson", "Chicago"]]));
        assert_eq!(result["row_count"], 1);
    }

    #[tokio::test]
    async fn test_cells_render_as_strings_and_null() {
        let f = fixture();
        f.call("init_sample_data", json!({})).await.unwrap();
        let result = f
            .call(
                "execute_query",
                json!({"query": "SELECT stock, price, NULL AS nothing FROM products WHERE id = 1"}),
            )
            .await
            .unwrap();
        assert_eq!(result["rows"], json!([["50", "999.99", null]]));
    }

    #[tokio::test]
    async fn test_write_reports_rows_affected() {
        let f = fixture();
        f.call("init_sample_data", json!({})).await.unwrap();
        let result = f
            .call(
                "execute_query",
                json!({"query": "UPDATE products SET stock = stock + 1 WHERE category = 'Electronics'"}),
            )
            .await
            .unwrap();
        assert_eq!(result, json!({"rows_affected": 2}));
    }

    #[tokio::test]
    async fn test_commented_and_returning_statements_return_rows() {
        let f = fixture();
        f.call("init_sample_data", json!({})).await.unwrap();

        let commented = f
            .call(
                "execute_query",
                json!({"query": "-- stock check\nSELECT stock FROM products WHERE id = 1"}),
            )
            .await
            .unwrap();
        assert_eq!(commented["rows"], json!([["50"]]));

        let inserted = f
            .call(
                "execute_query",
                json!({
                    "query": "INSERT INTO customers (name, email, city) VALUES (?, ?, ?) RETURNING id, name",
                    "params": ["Ada Lovelace", "ada@example.com", "London"],
                }),
            )
            .await
            .unwrap();
        assert_eq!(inserted["columns"], json!(["id", "name"]));
        assert_eq!(inserted["rows"], json!([["6", "Ada Lovelace"]]));
    }

    #[tokio::test]
    async fn test_describe_table() {
        let f = fixture();
        f.call("init_sample_data", json!({})).await.unwrap();
        let described = f.call("describe_table", json!({"table_name": "orders"})).await.unwrap();
        assert_eq!(described["table"], "orders");
        assert_eq!(described["row_count"], 5);

        let missing = f.call("describe_table", json!({"table_name": "ghosts"})).await.unwrap_err();
        assert!(missing.to_string().contains("ghosts"));

        let injected = f
            .call("describe_table", json!({"table_name": "orders); DROP TABLE orders; --"}))
            .await
            .unwrap_err();
        assert!(matches!(injected, ProviderError::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_failures_are_not_retryable() {
        let f = fixture();
        let empty = f.call("execute_query", json!({"query": "   "})).await.unwrap_err();
        assert_eq!(empty, ProviderError::permanent("Query cannot be empty"));

        let bad_sql = f.call("execute_query", json!({"query": "SELECT * FROM nowhere"})).await.unwrap_err();
        assert!(matches!(bad_sql, ProviderError::Failed { retryable: false, .. }));

        let mysql = f
            .call("execute_query", json!({"query": "SELECT 1", "database": "mysql"}))
            .await
            .unwrap_err();
        assert!(mysql.to_string().contains("not configured"));

        let mysql_seed = f.call("init_sample_data", json!({"database": "mysql"})).await.unwrap_err();
        assert!(matches!(mysql_seed, ProviderError::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_suspect_store_reopens() {
        let f = fixture();
        f.call("init_sample_data", json!({})).await.unwrap();
        f.tools[0].provider.mark_suspect();
        let result = f
            .call("execute_query", json!({"query": "SELECT COUNT(*) AS n FROM orders"}))
            .await
            .unwrap();
        assert_eq!(result["rows"], json!([["6"]]));
    }
}
