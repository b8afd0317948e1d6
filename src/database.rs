//! The database handle: runs transactions and publishes their changes.
//!
//! Every transaction runs on a blocking thread with its own pooled
//! connection. Read-only transactions use the read-only pool; read-write
//! transactions take the single writer connection with `BEGIN IMMEDIATE`,
//! so commits are serialized.
//!
//! Changes of a committed read-write transaction are published while the
//! writer connection is still held. Local feed order therefore equals
//! commit order, and no notification can be published for a transaction
//! that did not commit.

use futures::StreamExt;
use rusqlite::TransactionBehavior;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::changes::Changes;
use crate::config::Config;
use crate::error::Error;
use crate::flow::{BroadcastTransport, ChangeEvent, ChangeFeed, InboundStream};
use crate::observability::metrics::{self, ChangeSource};
use crate::query::{OperationBuilder, Query, ReadOnly, ReadWrite};
use crate::storage::{
    ConnectionPools, Schema, StorageError, StoreInfo, Transaction, TxMode,
};

/// Handle to an open database. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    pools: ConnectionPools,
    schema: Schema,
    feed: ChangeFeed,
    transport: Arc<dyn BroadcastTransport>,
    cancel: CancellationToken,
}

impl Database {
    /// Open (creating if needed) the database described by `config`.
    ///
    /// Stores in `schema` are registered on first use. Messages arriving
    /// on `transport` are fed into this database's change feed until the
    /// last handle is dropped or [`close`](Self::close) is called.
    pub async fn open(
        config: &Config,
        schema: Schema,
        transport: Arc<dyn BroadcastTransport>,
    ) -> Result<Self, Error> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir).map_err(StorageError::from)?;

        let db_path = config.db_path();
        let pools = {
            let schema = schema.clone();
            let db_path = db_path.clone();
            let reader_pool_size = config.reader_pool_size;
            let busy_timeout = config.busy_timeout();
            tokio::task::spawn_blocking(move || {
                ConnectionPools::open(db_path, &schema, reader_pool_size, busy_timeout)
            })
            .await??
        };

        let feed = ChangeFeed::new(config.notify_channel_size);
        let cancel = CancellationToken::new();
        tokio::spawn(relay_inbound(
            feed.clone(),
            transport.inbound(),
            cancel.clone(),
        ));

        tracing::info!(
            path = %db_path.display(),
            stores = schema.stores.len(),
            "Database opened"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                pools,
                schema,
                feed,
                transport,
                cancel,
            }),
        })
    }

    /// Start a read-only operation over `stores`.
    pub fn query<I, S>(&self, stores: I) -> OperationBuilder<ReadOnly>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OperationBuilder::new(self.clone(), collect_stores(stores))
    }

    /// Start a read-write operation over `stores`.
    pub fn mutate<I, S>(&self, stores: I) -> OperationBuilder<ReadWrite>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        OperationBuilder::new(self.clone(), collect_stores(stores))
    }

    /// Run `query` in a new transaction.
    ///
    /// A transactor error rolls the transaction back and is returned
    /// unchanged; nothing is published. On commit of a read-write
    /// transaction with valid changes, the changes are pushed to the
    /// local feed and then sent over the broadcast transport.
    #[tracing::instrument(
        name = "exec_query",
        skip_all,
        fields(mode = query.mode().as_str(), stores = ?query.stores())
    )]
    pub async fn exec_query<V: Send + 'static>(&self, query: &Query<V>) -> Result<V, Error> {
        let inner = Arc::clone(&self.inner);
        let query = query.clone();
        let span = tracing::Span::current();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            inner.run(&query)
        })
        .await?
    }

    /// Subscribe to the local change feed.
    ///
    /// Carries changes committed here and changes received from other
    /// contexts, each once.
    pub fn changes(&self) -> broadcast::Receiver<ChangeEvent> {
        self.inner.feed.subscribe()
    }

    /// Publish `changes` locally and to other contexts. Invalid (empty)
    /// changes are ignored.
    pub fn notify_changes(&self, changes: Changes) {
        self.inner.notify_changes(changes);
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Registered stores with their record counts, by name.
    pub async fn list_stores(&self) -> Result<Vec<StoreInfo>, Error> {
        let pools = self.inner.pools.clone();
        Ok(tokio::task::spawn_blocking(move || pools.list_stores()).await??)
    }

    /// Stop relaying inbound broadcast messages. Local commits keep working.
    pub fn close(&self) {
        self.inner.cancel.cancel();
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("stores", &self.inner.schema.stores.len())
            .field("subscribers", &self.inner.feed.receiver_count())
            .finish_non_exhaustive()
    }
}

impl DatabaseInner {
    fn run<V>(&self, query: &Query<V>) -> Result<V, Error> {
        if let Some(unknown) = query
            .stores()
            .iter()
            .find(|store| self.schema.store(store).is_none())
        {
            return Err(Error::UnknownStore(unknown.clone()));
        }

        let mode = query.mode();
        let started = Instant::now();
        let (mut conn, behavior) = match mode {
            TxMode::ReadOnly => (self.pools.reader()?, TransactionBehavior::Deferred),
            TxMode::ReadWrite => (self.pools.writer()?, TransactionBehavior::Immediate),
        };

        let tx = conn.transaction_with_behavior(behavior)?;
        let outcome = query.run(&Transaction::new(&tx, mode, query.stores(), &self.schema));

        let (value, changes) = match outcome {
            Ok(result) => result.into_parts(),
            Err(e) => {
                // Dropping the transaction rolls it back.
                drop(tx);
                metrics::record_abort(mode);
                tracing::debug!(error = %e, "Transaction aborted");
                return Err(e);
            }
        };

        if let Err(e) = tx.commit() {
            metrics::record_abort(mode);
            tracing::debug!(error = %e, "Commit failed");
            return Err(e.into());
        }
        metrics::record_commit(mode, started.elapsed().as_secs_f64());

        if mode == TxMode::ReadWrite && changes.is_valid() {
            tracing::debug!(
                stores = ?changes.iter().map(|(store, _)| store).collect::<Vec<_>>(),
                "Transaction committed with changes"
            );
            self.notify_changes(changes);
        }

        drop(conn);
        Ok(value)
    }

    fn notify_changes(&self, changes: Changes) {
        if !changes.is_valid() {
            return;
        }
        let message = changes.serialize();
        let receivers = self.feed.publish(Arc::new(changes));
        metrics::record_changes_published(ChangeSource::Local);
        tracing::trace!(receivers, "Published local changes");
        self.transport.send(message);
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn collect_stores<I, S>(stores: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    stores.into_iter().map(Into::into).collect()
}

/// Feed decoded messages from other contexts into the local feed.
///
/// Malformed messages are logged and dropped. Nothing is sent back over
/// the transport.
async fn relay_inbound(feed: ChangeFeed, mut inbound: InboundStream, cancel: CancellationToken) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            message = inbound.next() => {
                let Some(message) = message else {
                    tracing::debug!("Broadcast transport closed");
                    break;
                };
                match Changes::deserialize(&message) {
                    Ok(changes) if changes.is_valid() => {
                        let receivers = feed.publish(Arc::new(changes));
                        metrics::record_changes_published(ChangeSource::Remote);
                        tracing::trace!(receivers, "Published remote changes");
                    }
                    Ok(_) => tracing::trace!("Ignoring empty remote changes"),
                    Err(e) => {
                        metrics::record_dropped_message();
                        tracing::warn!(error = %e, len = message.len(), "Dropping malformed broadcast message");
                    }
                }
            }
        }
    }
}
