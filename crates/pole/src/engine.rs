use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pole_index::{LockProvider, Registry};
use pole_raft::RaftNode;
use pole_sql::{Action, SqlPlan};
use pole_types::{Catalog, Command, FieldType, Mapping};

use crate::catalog::CommandOutcome;
use crate::error::Error;
use crate::rpc;

/// Lock commands ride the fast path; catalog changes get a little longer.
pub const LOCK_APPLY_TIMEOUT: Duration = Duration::from_millis(200);
pub const CATALOG_APPLY_TIMEOUT: Duration = Duration::from_secs(1);

/// The top-level dispatcher: routes every statement to local execution or
/// a leader-forwarded RPC, owns the handle registry, and glues the
/// directory's advisory lock to the replicated lock set.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    registry: Registry,
    catalog: Arc<RwLock<Catalog>>,
    raft: RaftNode,
}

/// The outcome of one statement.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecOutcome {
    /// A mutation or DDL statement that completed.
    Ok,
    Select(SelectResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectResponse {
    pub took_ms: u64,
    pub timed_out: bool,
    pub hits: Hits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hits {
    pub total: u64,
    pub max_score: f64,
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_score")]
    pub score: f64,
    #[serde(rename = "_source")]
    pub source: serde_json::Map<String, serde_json::Value>,
}

impl Engine {
    pub fn new(index_uri: &str, catalog: Arc<RwLock<Catalog>>, raft: RaftNode) -> Engine {
        let locks = Arc::new(ClusterLock { raft: raft.clone(), catalog: catalog.clone() });
        Engine {
            inner: Arc::new(EngineInner {
                registry: Registry::new(index_uri, Some(locks)),
                catalog,
                raft,
            }),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.inner.raft.is_leader()
    }

    /// A read-only snapshot of the replicated catalog.
    pub fn mapping(&self) -> Catalog {
        self.inner.catalog.read().unwrap().clone()
    }

    /// Parse and execute one statement. Reads always run locally;
    /// mutations run locally on the leader and are forwarded otherwise.
    pub fn exec(&self, sql: &str) -> Result<ExecOutcome, Error> {
        let plan = pole_sql::parse(sql)?;
        if plan.action == Action::Select {
            return self.exec_select(&plan).map(ExecOutcome::Select);
        }

        if self.is_leader() {
            self.exec_mutation(&plan)?;
            return Ok(ExecOutcome::Ok);
        }

        let leader = self.leader_rpc_addr()?;
        tracing::debug!(%leader, table = %plan.table, "forwarding statement to leader");
        rpc::client::exec(&leader, sql)?;
        // this node may hold a reader predating the forwarded write
        self.inner.registry.invalidate_reader(&plan.table);
        Ok(ExecOutcome::Ok)
    }

    /// Take the cluster-wide advisory lock for `token`.
    pub fn lock(&self, token: &str) -> Result<(), Error> {
        if self.is_leader() {
            return submit_command(
                &self.inner.raft,
                Command::Lock { token: token.to_string() },
                LOCK_APPLY_TIMEOUT,
            );
        }
        rpc::client::lock(&self.leader_rpc_addr()?, token)
    }

    pub fn unlock(&self, token: &str) -> Result<(), Error> {
        if self.is_leader() {
            return submit_command(
                &self.inner.raft,
                Command::Unlock { token: token.to_string() },
                LOCK_APPLY_TIMEOUT,
            );
        }
        rpc::client::unlock(&self.leader_rpc_addr()?, token)
    }

    /// Close every writer. Only the leader ever opened any.
    pub fn close(&self) {
        if self.is_leader() {
            self.inner.registry.close_all();
        }
    }

    fn leader_rpc_addr(&self) -> Result<String, Error> {
        let addr = self.inner.catalog.read().unwrap().leader_rpc_addr.clone();
        if addr.is_empty() {
            return Err(Error::NoLeader);
        }
        Ok(addr)
    }

    fn mapping_of(&self, index: &str) -> Result<Mapping, Error> {
        self.inner
            .catalog
            .read()
            .unwrap()
            .mappings
            .get(index)
            .cloned()
            .ok_or(Error::IndexNotFound)
    }

    fn exec_mutation(&self, plan: &SqlPlan) -> Result<(), Error> {
        match plan.action {
            Action::Create => self.exec_create(plan),
            Action::Drop => self.exec_drop(plan),
            Action::Insert | Action::Update | Action::Delete => self.exec_write(plan),
            Action::Select => unreachable!("reads never reach the mutation path"),
        }
    }

    fn exec_create(&self, plan: &SqlPlan) -> Result<(), Error> {
        let index = &plan.table;
        if self.inner.catalog.read().unwrap().mappings.contains_key(index) {
            return Err(Error::IndexExists);
        }
        let mapping = plan.mapping_from_columns();

        // opening the writer claims the distributed lock over the shared
        // directory before the mapping becomes visible
        self.inner.registry.get_writer(index)?;

        submit_command(
            &self.inner.raft,
            Command::AddMapping { index: index.clone(), mapping },
            CATALOG_APPLY_TIMEOUT,
        )?;
        tracing::info!(%index, "created index");
        Ok(())
    }

    fn exec_drop(&self, plan: &SqlPlan) -> Result<(), Error> {
        let index = &plan.table;
        if !self.inner.catalog.read().unwrap().mappings.contains_key(index) {
            return Err(Error::IndexNotFound);
        }
        submit_command(
            &self.inner.raft,
            Command::DeleteMapping { index: index.clone() },
            CATALOG_APPLY_TIMEOUT,
        )?;
        self.inner.registry.drop_index(index);
        tracing::info!(%index, "dropped index");
        Ok(())
    }

    fn exec_write(&self, plan: &SqlPlan) -> Result<(), Error> {
        let index = &plan.table;
        let mapping = self.mapping_of(index)?;
        let writer = self.inner.registry.get_writer(index)?;

        let batch = match plan.action {
            Action::Insert => plan.build_insert_batch(&mapping)?,
            Action::Update => plan.build_update_batch(&mapping)?,
            Action::Delete => plan.build_delete_batch(&mapping)?,
            _ => unreachable!(),
        };
        writer.batch(&batch)?;

        // the next read must observe this write
        self.inner.registry.invalidate_reader(index);
        Ok(())
    }

    fn exec_select(&self, plan: &SqlPlan) -> Result<SelectResponse, Error> {
        let index = &plan.table;
        let mapping = self.mapping_of(index)?;
        let reader = self.inner.registry.get_reader(index)?;
        let request = plan.build_request(&mapping)?;
        let results = reader.search(&request)?;

        let hits = results
            .iter()
            .map(|hit| Hit {
                index: index.clone(),
                id: hit.id.clone(),
                score: hit.score,
                source: project_source(plan, &mapping, &hit.fields),
            })
            .collect();
        Ok(SelectResponse {
            took_ms: results.took.as_millis() as u64,
            timed_out: false,
            hits: Hits { total: results.total, max_score: results.max_score, hits },
        })
    }
}

/// Project the stored fields of one hit through the requested column set,
/// decoding each by its mapped type.
fn project_source(
    plan: &SqlPlan,
    mapping: &Mapping,
    fields: &[pole_index::Field],
) -> serde_json::Map<String, serde_json::Value> {
    let mut source = serde_json::Map::new();
    for field in fields {
        let requested = plan.select_all || plan.cols.iter().any(|col| col.name == field.name);
        if !requested {
            continue;
        }
        let value = match mapping.field_type(&field.name) {
            Some(FieldType::Numeric) => field.as_numeric().map(|v| serde_json::json!(v)),
            Some(FieldType::Text) | None => field.as_text().map(|v| serde_json::json!(v)),
            Some(FieldType::Unknown) => None,
        };
        if let Some(value) = value {
            source.insert(field.name.clone(), value);
        }
    }
    source
}

/// Submit a catalog command through consensus and surface the outcome the
/// state machine computed.
pub(crate) fn submit_command(
    raft: &RaftNode,
    command: Command,
    timeout: Duration,
) -> Result<(), Error> {
    let response = raft.apply(command.encode(), timeout)?;
    match CommandOutcome::decode(&response)
        .map_err(|err| Error::Internal(format!("undecodable apply response: {err}")))?
    {
        CommandOutcome::Ok => Ok(()),
        CommandOutcome::Catalog(err) => Err(Error::Catalog(err)),
        CommandOutcome::Malformed(reason) => Err(Error::Internal(reason)),
    }
}

/// The directory's lock callback: routed through consensus on the leader,
/// forwarded to the leader's RPC otherwise.
struct ClusterLock {
    raft: RaftNode,
    catalog: Arc<RwLock<Catalog>>,
}

impl ClusterLock {
    fn submit(&self, command: Command) -> Result<(), Error> {
        if self.raft.is_leader() {
            return submit_command(&self.raft, command, LOCK_APPLY_TIMEOUT);
        }
        let leader = self.catalog.read().unwrap().leader_rpc_addr.clone();
        if leader.is_empty() {
            return Err(Error::NoLeader);
        }
        match command {
            Command::Lock { token } => rpc::client::lock(&leader, &token),
            Command::Unlock { token } => rpc::client::unlock(&leader, &token),
            _ => Err(Error::Internal("not a lock command".to_string())),
        }
    }
}

impl LockProvider for ClusterLock {
    fn lock(&self, token: &str) -> pole_index::Result<()> {
        self.submit(Command::Lock { token: token.to_string() })
            .map_err(|err| pole_index::Error::Lock(err.to_string()))
    }

    fn unlock(&self, token: &str) -> pole_index::Result<()> {
        self.submit(Command::Unlock { token: token.to_string() })
            .map_err(|err| pole_index::Error::Lock(err.to_string()))
    }
}
