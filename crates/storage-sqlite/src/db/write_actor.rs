//! Single-writer actor.
//!
//! All mutations are sent to one dedicated thread that owns a connection and
//! runs each job inside `BEGIN IMMEDIATE ... COMMIT`. Jobs run strictly in
//! submission order.

use cairn_core::{Error, Result};
use diesel::SqliteConnection;
use log::{debug, error};
use tokio::sync::{mpsc, oneshot};

use super::{DbConnection, DbPool};
use crate::errors::StorageError;

type Job = Box<dyn FnOnce(std::result::Result<&mut SqliteConnection, StorageError>) + Send>;

/// Error inside a writer transaction: either the job's own error or a
/// diesel failure while beginning/committing.
enum TxError {
    Job(Error),
    Diesel(diesel::result::Error),
}

impl From<diesel::result::Error> for TxError {
    fn from(err: diesel::result::Error) -> Self {
        TxError::Diesel(err)
    }
}

#[derive(Debug, Clone)]
pub struct WriteHandle {
    tx: mpsc::UnboundedSender<Job>,
}

impl WriteHandle {
    /// Run `job` on the writer thread in its own transaction. An `Err` from
    /// the job rolls the transaction back.
    pub async fn exec<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel::<Result<T>>();
        let boxed: Job = Box::new(move |conn| {
            let result = match conn {
                Ok(conn) => run_in_transaction(conn, job),
                Err(e) => Err(e.into()),
            };
            // The caller may have stopped waiting.
            let _ = reply_tx.send(result);
        });

        self.tx.send(boxed).map_err(|_| {
            StorageError::WriterUnavailable("writer thread has stopped".to_string())
        })?;
        reply_rx.await.map_err(|_| {
            Error::from(StorageError::WriterUnavailable(
                "writer dropped the job".to_string(),
            ))
        })?
    }
}

fn run_in_transaction<F, T>(conn: &mut SqliteConnection, job: F) -> Result<T>
where
    F: FnOnce(&mut SqliteConnection) -> Result<T>,
{
    conn.immediate_transaction::<T, TxError, _>(|tx| job(tx).map_err(TxError::Job))
        .map_err(|e| match e {
            TxError::Job(e) => e,
            TxError::Diesel(e) => StorageError::Query(e).into(),
        })
}

/// Start the writer thread. It exits once every [`WriteHandle`] is dropped.
pub fn spawn_writer(pool: DbPool) -> WriteHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

    let spawned = std::thread::Builder::new()
        .name("cairn-sqlite-writer".to_string())
        .spawn(move || {
            let mut conn: Option<DbConnection> = None;
            while let Some(job) = rx.blocking_recv() {
                if conn.is_none() {
                    match pool.get() {
                        Ok(acquired) => conn = Some(acquired),
                        Err(e) => {
                            error!("[Storage] Writer could not acquire a connection: {}", e);
                            job(Err(StorageError::Pool(e)));
                            continue;
                        }
                    }
                }
                if let Some(conn) = conn.as_mut() {
                    job(Ok(&mut **conn));
                }
            }
            debug!("[Storage] Writer thread stopped");
        });

    if let Err(e) = spawned {
        error!("[Storage] Failed to spawn writer thread: {}", e);
    }
    WriteHandle { tx }
}
