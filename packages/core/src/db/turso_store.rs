//! TursoStore - TreeStore Implementation for the libsql Backend
//!
//! This module implements the store traits on top of [`DatabaseService`].
//!
//! # Architecture
//!
//! 1. **Configured columns**: every statement is generated once from the
//!    [`TreeConfig`] column map, with identifiers validated and quoted
//! 2. **Row Conversion**: `libsql::Row` → `Node`; NULL ordering columns read as 0
//! 3. **Transactions**: `BEGIN IMMEDIATE` takes the write lock up front so two
//!    facade calls never interleave their shifts; `COMMIT` publishes,
//!    `ROLLBACK` (or closing the connection) discards
//! 4. **Errors**: lock contention maps to `ConcurrencyConflict`, anything else
//!    to `Storage` with the statement as context

use crate::config::TreeConfig;
use crate::db::database::DatabaseService;
use crate::db::error::DatabaseError;
use crate::db::node_store::{NodeAccessor, StoreResult, TreeStore, TreeTransaction};
use crate::models::{IntervalAssignment, Node, NodeId, NodeUpdate, PositionScope};
use crate::operations::OrderingError;
use async_trait::async_trait;
use libsql::{Connection, Row, Value};
use std::sync::Arc;

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

fn nullable(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

/// SQL fragments generated from a column map
#[derive(Debug)]
struct Statements {
    table: String,
    id: String,
    parent_id: String,
    left: String,
    right: String,
    level: String,
    position: String,
    root_position: Option<String>,
    select: String,
}

impl Statements {
    fn new(config: &TreeConfig) -> Self {
        let c = &config.columns;
        let root_position = c.root_position.as_deref().map(quote);

        let mut columns = vec![
            quote(&c.id),
            quote(&c.parent_id),
            quote(&c.left),
            quote(&c.right),
            quote(&c.level),
            quote(&c.position),
        ];
        if let Some(root_position) = &root_position {
            columns.push(root_position.clone());
        }

        Self {
            select: format!("SELECT {} FROM {}", columns.join(", "), quote(&config.table)),
            table: quote(&config.table),
            id: quote(&c.id),
            parent_id: quote(&c.parent_id),
            left: quote(&c.left),
            right: quote(&c.right),
            level: quote(&c.level),
            position: quote(&c.position),
            root_position,
        }
    }

    fn scope_column(&self, scope: PositionScope) -> StoreResult<&str> {
        match scope {
            PositionScope::Sibling => Ok(&self.position),
            PositionScope::Root => self.root_position.as_deref().ok_or_else(|| {
                OrderingError::invalid_config("no root ordering column is configured")
            }),
        }
    }

    fn order_by(&self, scope: PositionScope) -> StoreResult<String> {
        Ok(match scope {
            PositionScope::Sibling => format!("{}, {}", self.position, self.id),
            PositionScope::Root => {
                let root = self.scope_column(scope)?;
                format!("{root} IS NULL, {root}, {}, {}", self.position, self.id)
            }
        })
    }

    /// Convert a row selected by `self.select` into a Node
    fn row_to_node(&self, row: &Row) -> Result<Node, DatabaseError> {
        let decode = |field: &str, e: libsql::Error| {
            DatabaseError::row_decode(format!("failed to get {}: {}", field, e))
        };

        let id: i64 = row.get(0).map_err(|e| decode("id", e))?;
        let parent_id: Option<i64> = row.get(1).map_err(|e| decode("parent_id", e))?;
        let left: Option<i64> = row.get(2).map_err(|e| decode("left", e))?;
        let right: Option<i64> = row.get(3).map_err(|e| decode("right", e))?;
        let level: Option<i64> = row.get(4).map_err(|e| decode("level", e))?;
        let position: Option<i64> = row.get(5).map_err(|e| decode("position", e))?;
        let root_position: Option<i64> = if self.root_position.is_some() {
            row.get(6).map_err(|e| decode("root_position", e))?
        } else {
            None
        };

        Ok(Node {
            id,
            parent_id,
            left: left.unwrap_or(0),
            right: right.unwrap_or(0),
            level: level.unwrap_or(0),
            position: position.unwrap_or(0),
            root_position,
        })
    }

    async fn query_nodes(
        &self,
        conn: &Connection,
        sql: &str,
        params: Vec<Value>,
    ) -> StoreResult<Vec<Node>> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement(sql, e))?;

        let mut nodes = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_statement(sql, e))?
        {
            nodes.push(self.row_to_node(&row)?);
        }
        Ok(nodes)
    }

    async fn query_scalar(
        &self,
        conn: &Connection,
        sql: &str,
        params: Vec<Value>,
    ) -> StoreResult<Option<i64>> {
        let mut rows = conn
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement(sql, e))?;

        match rows
            .next()
            .await
            .map_err(|e| DatabaseError::from_statement(sql, e))?
        {
            Some(row) => {
                let value: Option<i64> = row
                    .get(0)
                    .map_err(|e| DatabaseError::row_decode(format!("{}: {}", sql, e)))?;
                Ok(value)
            }
            None => Ok(None),
        }
    }

    async fn execute(&self, conn: &Connection, sql: &str, params: Vec<Value>) -> StoreResult<u64> {
        let affected = conn
            .execute(sql, params)
            .await
            .map_err(|e| DatabaseError::from_statement(sql, e))?;
        Ok(affected)
    }

    async fn fetch(&self, conn: &Connection, id: NodeId) -> StoreResult<Option<Node>> {
        let sql = format!("{} WHERE {} = ?", self.select, self.id);
        let nodes = self
            .query_nodes(conn, &sql, vec![Value::Integer(id)])
            .await?;
        Ok(nodes.into_iter().next())
    }

    async fn fetch_children(
        &self,
        conn: &Connection,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Vec<Node>> {
        let sql = format!(
            "{} WHERE {} IS ? ORDER BY {}",
            self.select,
            self.parent_id,
            self.order_by(scope)?
        );
        self.query_nodes(conn, &sql, vec![nullable(parent_id)])
            .await
    }

    async fn fetch_all(&self, conn: &Connection) -> StoreResult<Vec<Node>> {
        self.query_nodes(conn, &self.select, Vec::new()).await
    }

    async fn update(&self, conn: &Connection, id: NodeId, update: NodeUpdate) -> StoreResult<()> {
        let mut sets = Vec::new();
        let mut params = Vec::new();

        if let Some(parent_id) = update.parent_id {
            sets.push(format!("{} = ?", self.parent_id));
            params.push(nullable(parent_id));
        }
        if let Some(position) = update.position {
            sets.push(format!("{} = ?", self.position));
            params.push(Value::Integer(position));
        }
        if let Some(root_position) = update.root_position {
            sets.push(format!("{} = ?", self.scope_column(PositionScope::Root)?));
            params.push(Value::Integer(root_position));
        }
        if let Some(left) = update.left {
            sets.push(format!("{} = ?", self.left));
            params.push(Value::Integer(left));
        }
        if let Some(right) = update.right {
            sets.push(format!("{} = ?", self.right));
            params.push(Value::Integer(right));
        }
        if let Some(level) = update.level {
            sets.push(format!("{} = ?", self.level));
            params.push(Value::Integer(level));
        }

        if sets.is_empty() {
            return match self.fetch(conn, id).await? {
                Some(_) => Ok(()),
                None => Err(OrderingError::not_found(id)),
            };
        }

        params.push(Value::Integer(id));
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table,
            sets.join(", "),
            self.id
        );
        match self.execute(conn, &sql, params).await? {
            0 => Err(OrderingError::not_found(id)),
            _ => Ok(()),
        }
    }

    async fn shift_positions(
        &self,
        conn: &Connection,
        parent_id: Option<NodeId>,
        scope: PositionScope,
        from_inclusive: i64,
        delta: i64,
    ) -> StoreResult<u64> {
        let column = self.scope_column(scope)?;
        let sql = format!(
            "UPDATE {table} SET {column} = {column} + ? WHERE {parent} IS ? AND {column} >= ?",
            table = self.table,
            column = column,
            parent = self.parent_id,
        );
        self.execute(
            conn,
            &sql,
            vec![
                Value::Integer(delta),
                nullable(parent_id),
                Value::Integer(from_inclusive),
            ],
        )
        .await
    }

    async fn aggregate_position(
        &self,
        conn: &Connection,
        function: &str,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>> {
        let sql = format!(
            "SELECT {}({}) FROM {} WHERE {} IS ?",
            function,
            self.scope_column(scope)?,
            self.table,
            self.parent_id
        );
        self.query_scalar(conn, &sql, vec![nullable(parent_id)])
            .await
    }

    async fn write_intervals(
        &self,
        conn: &Connection,
        assignments: &[IntervalAssignment],
    ) -> StoreResult<()> {
        let sql = format!(
            "UPDATE {} SET {} = ?, {} = ?, {} = ? WHERE {} = ?",
            self.table, self.left, self.right, self.level, self.id
        );
        for assignment in assignments {
            let affected = self
                .execute(
                    conn,
                    &sql,
                    vec![
                        Value::Integer(assignment.left),
                        Value::Integer(assignment.right),
                        Value::Integer(assignment.level),
                        Value::Integer(assignment.id),
                    ],
                )
                .await?;
            if affected == 0 {
                return Err(OrderingError::not_found(assignment.id));
            }
        }
        Ok(())
    }
}

/// TursoStore implements TreeStore for the libsql backend
#[derive(Debug, Clone)]
pub struct TursoStore {
    db: Arc<DatabaseService>,
    statements: Arc<Statements>,
}

impl TursoStore {
    /// Create a store for the table described by `config`
    ///
    /// # Errors
    ///
    /// `OrderingError::InvalidConfig` if the table or column names are invalid.
    pub fn new(db: Arc<DatabaseService>, config: &TreeConfig) -> Result<Self, OrderingError> {
        config.validate()?;
        Ok(Self {
            db,
            statements: Arc::new(Statements::new(config)),
        })
    }

    /// Underlying database service
    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    /// Insert a row the way the data-entry layer does
    ///
    /// Used by tests and the development CLI; the engine never creates rows.
    pub async fn insert(&self, node: &Node) -> StoreResult<()> {
        let s = &self.statements;
        let conn = self.db.connect_with_timeout().await?;

        let mut columns = vec![
            s.id.clone(),
            s.parent_id.clone(),
            s.left.clone(),
            s.right.clone(),
            s.level.clone(),
            s.position.clone(),
        ];
        let mut params = vec![
            Value::Integer(node.id),
            nullable(node.parent_id),
            Value::Integer(node.left),
            Value::Integer(node.right),
            Value::Integer(node.level),
            Value::Integer(node.position),
        ];
        if let Some(root_position) = &s.root_position {
            columns.push(root_position.clone());
            params.push(nullable(node.root_position));
        }

        let placeholders = vec!["?"; columns.len()].join(", ");
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            s.table,
            columns.join(", "),
            placeholders
        );
        s.execute(&conn, &sql, params).await?;
        Ok(())
    }

    /// Physically delete a row, bypassing the engine
    pub async fn delete_row(&self, id: NodeId) -> StoreResult<bool> {
        let s = &self.statements;
        let conn = self.db.connect_with_timeout().await?;
        let sql = format!("DELETE FROM {} WHERE {} = ?", s.table, s.id);
        Ok(s.execute(&conn, &sql, vec![Value::Integer(id)]).await? > 0)
    }

    /// Every committed row, read outside any transaction
    pub async fn rows(&self) -> StoreResult<Vec<Node>> {
        let conn = self.db.connect_with_timeout().await?;
        let mut nodes = self.statements.fetch_all(&conn).await?;
        nodes.sort_by_key(|n| n.id);
        Ok(nodes)
    }
}

#[async_trait]
impl TreeStore for TursoStore {
    async fn begin(&self) -> StoreResult<Box<dyn TreeTransaction>> {
        let conn = self.db.connect_with_timeout().await?;
        conn.execute("BEGIN IMMEDIATE", ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to begin transaction", e))?;

        tracing::debug!("Opened tree transaction on {}", self.statements.table);

        Ok(Box::new(TursoTransaction {
            conn,
            statements: self.statements.clone(),
        }))
    }

    async fn get(&self, id: NodeId) -> StoreResult<Option<Node>> {
        let conn = self.db.connect_with_timeout().await?;
        self.statements.fetch(&conn, id).await
    }

    async fn children(&self, parent_id: Option<NodeId>) -> StoreResult<Vec<Node>> {
        let conn = self.db.connect_with_timeout().await?;
        self.statements
            .fetch_children(&conn, parent_id, PositionScope::Sibling)
            .await
    }
}

/// One `BEGIN IMMEDIATE` transaction on a dedicated connection
///
/// Dropping it without commit closes the connection, which rolls back.
pub struct TursoTransaction {
    conn: Connection,
    statements: Arc<Statements>,
}

#[async_trait]
impl NodeAccessor for TursoTransaction {
    async fn fetch(&self, id: NodeId) -> StoreResult<Option<Node>> {
        self.statements.fetch(&self.conn, id).await
    }

    async fn fetch_children(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Vec<Node>> {
        self.statements
            .fetch_children(&self.conn, parent_id, scope)
            .await
    }

    async fn fetch_all(&self) -> StoreResult<Vec<Node>> {
        self.statements.fetch_all(&self.conn).await
    }

    async fn update(&self, id: NodeId, update: NodeUpdate) -> StoreResult<()> {
        self.statements.update(&self.conn, id, update).await
    }

    async fn shift_positions(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
        from_inclusive: i64,
        delta: i64,
    ) -> StoreResult<u64> {
        self.statements
            .shift_positions(&self.conn, parent_id, scope, from_inclusive, delta)
            .await
    }

    async fn max_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>> {
        self.statements
            .aggregate_position(&self.conn, "MAX", parent_id, scope)
            .await
    }

    async fn min_position(
        &self,
        parent_id: Option<NodeId>,
        scope: PositionScope,
    ) -> StoreResult<Option<i64>> {
        self.statements
            .aggregate_position(&self.conn, "MIN", parent_id, scope)
            .await
    }

    async fn write_intervals(&self, assignments: &[IntervalAssignment]) -> StoreResult<()> {
        self.statements
            .write_intervals(&self.conn, assignments)
            .await
    }
}

#[async_trait]
impl TreeTransaction for TursoTransaction {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        if let Err(e) = self.conn.execute("COMMIT", ()).await {
            let _rollback = self.conn.execute("ROLLBACK", ()).await;
            return Err(DatabaseError::from_statement("Failed to commit transaction", e).into());
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.conn
            .execute("ROLLBACK", ())
            .await
            .map_err(|e| DatabaseError::from_statement("Failed to roll back transaction", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnMap;
    use tempfile::TempDir;

    async fn create_test_store(config: &TreeConfig) -> (TursoStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("tree.db");
        let db = DatabaseService::new(db_path).await.unwrap();
        db.ensure_table(config).await.unwrap();
        let store = TursoStore::new(Arc::new(db), config).unwrap();
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_insert_and_fetch_with_element_columns() {
        let config = TreeConfig::new("catalog")
            .with_columns(ColumnMap::for_element("ordering", "id", "parent"));
        let (store, _temp) = create_test_store(&config).await;

        store
            .insert(&Node::new(1, None, 1).with_root_position(4))
            .await
            .unwrap();
        store.insert(&Node::new(2, Some(1), 1)).await.unwrap();

        let root = store.get(1).await.unwrap().unwrap();
        assert_eq!(root.root_position, Some(4));
        assert_eq!(root.left, 0);

        let children = store.children(Some(1)).await.unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, 2);
        assert!(store.get(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_shift_and_aggregates_respect_null_parent() {
        let config = TreeConfig::default();
        let (store, _temp) = create_test_store(&config).await;

        for node in [
            Node::new(1, None, 1),
            Node::new(2, None, 2),
            Node::new(3, Some(1), 1),
            Node::new(4, Some(1), 2),
        ] {
            store.insert(&node).await.unwrap();
        }

        let tx = store.begin().await.unwrap();
        let shifted = tx
            .shift_positions(None, PositionScope::Sibling, 2, 1)
            .await
            .unwrap();
        assert_eq!(shifted, 1);
        assert_eq!(
            tx.max_position(None, PositionScope::Sibling).await.unwrap(),
            Some(3)
        );
        assert_eq!(
            tx.min_position(Some(1), PositionScope::Sibling).await.unwrap(),
            Some(1)
        );
        assert_eq!(
            tx.max_position(Some(3), PositionScope::Sibling).await.unwrap(),
            None
        );
        tx.commit().await.unwrap();

        assert_eq!(store.get(2).await.unwrap().unwrap().position, 3);
        assert_eq!(store.get(4).await.unwrap().unwrap().position, 2);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let config = TreeConfig::default();
        let (store, _temp) = create_test_store(&config).await;
        store.insert(&Node::new(1, None, 1)).await.unwrap();

        let tx = store.begin().await.unwrap();
        tx.update(1, NodeUpdate::scope_position(PositionScope::Sibling, 5))
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        assert_eq!(store.get(1).await.unwrap().unwrap().position, 1);
    }

    #[tokio::test]
    async fn test_root_scope_without_column_is_config_error() {
        let config = TreeConfig::default();
        let (store, _temp) = create_test_store(&config).await;

        let tx = store.begin().await.unwrap();
        let err = tx
            .max_position(None, PositionScope::Root)
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::InvalidConfig { .. }));
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let config = TreeConfig::default();
        let (store, _temp) = create_test_store(&config).await;

        let tx = store.begin().await.unwrap();
        let err = tx
            .update(7, NodeUpdate::scope_position(PositionScope::Sibling, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrderingError::NotFound { id: 7 }));
    }
}
