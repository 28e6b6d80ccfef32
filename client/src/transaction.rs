//! Abstracted binding surface; `trait Database` & `trait Transaction`.

//---------------------------------------------------------------------------------------------------- Import
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::{
    error::ClientError,
    options::{ConflictRangeType, MutationType, StreamingMode, TransactionOption},
    selector::KeySelector,
};

/// A key paired with its value.
pub type KeyValue = (Vec<u8>, Vec<u8>);

//---------------------------------------------------------------------------------------------------- Database
/// A handle to a Galena database.
///
/// Cheaply shareable behind an [`Arc`]; safe for concurrent use. All data
/// access goes through [`Transaction`] objects created here.
pub trait Database: Send + Sync {
    /// Start a new transaction against this database.
    fn create_transaction(&self) -> Result<Arc<dyn Transaction>, ClientError>;
}

//---------------------------------------------------------------------------------------------------- Transaction
/// A single transaction against a [`Database`].
///
/// Handles are internally synchronised: every method takes `&self` and the
/// handle may be shared across tasks, but a transaction's operations are
/// not meaningfully concurrent with its own `commit`.
///
/// Reads taken with `snapshot == true` do not add read-conflict ranges.
#[async_trait]
pub trait Transaction: Send + Sync {
    /// Read the value stored under `key`.
    async fn get(&self, key: &[u8], snapshot: bool) -> Result<Option<Vec<u8>>, ClientError>;

    /// Resolve a [`KeySelector`] to the key it points at.
    ///
    /// Resolving before the first key yields the empty key; resolving past
    /// the last key yields the end-of-keyspace marker `\xff`.
    async fn get_key(&self, selector: KeySelector, snapshot: bool)
        -> Result<Vec<u8>, ClientError>;

    /// Read every key-value pair between two resolved selectors.
    ///
    /// Multi-batch continuation is handled internally; the returned vector
    /// is always the complete result. `limit == 0` means unlimited. When
    /// `reverse` is set the pairs are returned descending.
    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        limit: usize,
        reverse: bool,
        mode: StreamingMode,
        snapshot: bool,
    ) -> Result<Vec<KeyValue>, ClientError>;

    /// Buffer a write of `value` under `key`.
    fn set(&self, key: &[u8], value: &[u8]);

    /// Buffer a deletion of `key`.
    fn clear(&self, key: &[u8]);

    /// Buffer a deletion of every key in `[begin, end)`.
    ///
    /// An inverted range (`end < begin`) latches an error on the
    /// transaction which surfaces at [`Transaction::commit`].
    fn clear_range(&self, begin: &[u8], end: &[u8]);

    /// Buffer an atomic mutation of `key`.
    fn atomic_op(&self, mutation: MutationType, key: &[u8], param: &[u8]);

    /// Manually add a conflict range of the given type.
    fn add_conflict_range(
        &self,
        begin: &[u8],
        end: &[u8],
        kind: ConflictRangeType,
    ) -> Result<(), ClientError>;

    /// Apply an option to this transaction.
    fn set_option(&self, option: TransactionOption) -> Result<(), ClientError>;

    /// Commit the buffered writes.
    async fn commit(&self) -> Result<(), ClientError>;

    /// Discard all state and make the handle usable as a fresh transaction.
    fn reset(&self);

    /// Irreversibly cancel the transaction; later operations return
    /// [`ClientError::TRANSACTION_CANCELLED`].
    fn cancel(&self);

    /// The retry protocol: given the error a previous operation returned,
    /// either reset the transaction for another attempt (`Ok`) or rethrow
    /// the error (`Err`) if it is not retryable.
    async fn on_error(&self, code: i32) -> Result<(), ClientError>;

    /// The version all reads of this transaction observe.
    async fn get_read_version(&self) -> Result<i64, ClientError>;

    /// Pin the read version instead of letting the database choose one.
    fn set_read_version(&self, version: i64);

    /// The version this transaction committed at, or `-1` before commit.
    fn get_committed_version(&self) -> i64;

    /// The versionstamp this transaction's commit was assigned.
    ///
    /// The returned future resolves only after [`Transaction::commit`]
    /// succeeds; it fails if the transaction is dropped uncommitted.
    fn get_versionstamp(&self) -> Versionstamp;
}

//---------------------------------------------------------------------------------------------------- Versionstamp
/// An eventually-available 10-byte commit versionstamp.
///
/// The sender half lives inside the transaction and is fulfilled at commit
/// time. A transaction that never commits drops the sender, which resolves
/// this future with [`ClientError::TRANSACTION_CANCELLED`].
pub struct Versionstamp(oneshot::Receiver<Result<Vec<u8>, ClientError>>);

impl Versionstamp {
    /// Wrap the receiving half of a versionstamp channel.
    pub const fn new(receiver: oneshot::Receiver<Result<Vec<u8>, ClientError>>) -> Self {
        Self(receiver)
    }
}

impl Future for Versionstamp {
    type Output = Result<Vec<u8>, ClientError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx).map(|res| match res {
            Ok(inner) => inner,
            Err(_) => Err(ClientError::TRANSACTION_CANCELLED),
        })
    }
}

//---------------------------------------------------------------------------------------------------- run_retriable
/// Run `body` inside a transient transaction, committing and retrying until
/// it either succeeds or fails with a non-retryable error.
///
/// The body may run multiple times; between attempts the transaction is
/// reset through [`Transaction::on_error`], which is also where retryable
/// errors are told apart from fatal ones.
pub async fn run_retriable<T, F>(db: &dyn Database, mut body: F) -> Result<T, ClientError>
where
    F: FnMut(Arc<dyn Transaction>) -> BoxFuture<'static, Result<T, ClientError>>,
{
    let tx = db.create_transaction()?;
    loop {
        let error = match body(Arc::clone(&tx)).await {
            Ok(value) => match tx.commit().await {
                Ok(()) => return Ok(value),
                Err(e) => e,
            },
            Err(e) => e,
        };
        tx.on_error(error.code).await?;
    }
}
