//! Hermetic in-memory storage engine; `MemDatabase`.
//!
//! A single-process ordered key-value store with snapshot isolation:
//! transactions read from an owned snapshot, buffer their writes locally,
//! and validate their read set against every commit that happened after
//! their snapshot was taken. Conflicts surface as
//! [`ClientError::NOT_COMMITTED`], which is retryable and drives the same
//! retry protocol a real cluster would.

//---------------------------------------------------------------------------------------------------- Import
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    ops::Bound,
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::trace;

use crate::{
    error::{ClientError, InitError},
    options::{ConflictRangeType, MutationType, StreamingMode, TransactionOption},
    selector::KeySelector,
    transaction::{Database, KeyValue, Transaction, Versionstamp},
};

//---------------------------------------------------------------------------------------------------- Constants
/// Largest value an [`MutationType::AppendIfFits`] result may reach.
const VALUE_SIZE_LIMIT: usize = 100_000;

/// How many committed write sets are kept for conflict validation.
///
/// A transaction whose snapshot predates the oldest kept record can no
/// longer be validated and fails with `TRANSACTION_TOO_OLD`.
const COMMIT_LOG_LIMIT: usize = 1024;

/// Pause between retryable attempts in [`Transaction::on_error`].
const RETRY_BACKOFF: Duration = Duration::from_millis(2);

/// The end-of-keyspace marker selector resolution clamps to.
const KEYSPACE_END: &[u8] = &[0xff];

/// A half-open key range `[0] .. [1]`.
type Range = (Vec<u8>, Vec<u8>);

//---------------------------------------------------------------------------------------------------- Store
/// The shared global state behind every handle of one database.
#[derive(Debug, Default)]
struct Store {
    /// The committed key-value data.
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    /// The version of the latest commit.
    version: i64,
    /// Recently committed write ranges, newest last.
    commits: VecDeque<CommitRecord>,
}

/// The write footprint of one commit, kept for conflict validation.
#[derive(Debug)]
struct CommitRecord {
    version: i64,
    writes: Vec<Range>,
}

//---------------------------------------------------------------------------------------------------- MemDatabase
/// An in-memory Galena database.
///
/// Cheap to clone; all clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemDatabase {
    store: Arc<Mutex<Store>>,
}

impl MemDatabase {
    /// A fresh, empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the database a cluster file describes.
    ///
    /// The file must exist and be readable; its contents are an opaque
    /// cluster description this engine does not interpret.
    pub fn open(cluster_file: &Path) -> Result<Self, InitError> {
        std::fs::read(cluster_file)?;
        Ok(Self::new())
    }
}

impl Database for MemDatabase {
    fn create_transaction(&self) -> Result<Arc<dyn Transaction>, ClientError> {
        Ok(Arc::new(MemTransaction {
            store: Arc::clone(&self.store),
            state: Mutex::new(TxState::new()),
        }))
    }
}

//---------------------------------------------------------------------------------------------------- MemTransaction
/// One transaction against a [`MemDatabase`].
struct MemTransaction {
    store: Arc<Mutex<Store>>,
    state: Mutex<TxState>,
}

/// A consistent view of the store taken at first read.
#[derive(Debug)]
struct Snapshot {
    version: i64,
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

/// Everything a transaction accumulates before commit.
struct TxState {
    snapshot: Option<Snapshot>,
    read_version_override: Option<i64>,
    /// Buffered point writes; `None` is a deletion. Entries shadow both the
    /// snapshot and `cleared`.
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    /// Buffered range deletions; mask the snapshot only, since any overlay
    /// entry inside one was inserted after the clear.
    cleared: Vec<Range>,
    /// Versionstamped mutations, applied at commit once the stamp is known.
    versionstamped: Vec<(MutationType, Vec<u8>, Vec<u8>)>,
    read_conflicts: Vec<Range>,
    write_conflicts: Vec<Range>,
    next_write_no_conflict: bool,
    retry_limit: Option<i64>,
    timeout_ms: Option<i64>,
    retries: i64,
    cancelled: bool,
    /// `-1` until the transaction commits.
    committed_version: i64,
    committed_stamp: Option<Vec<u8>>,
    /// An error raised by a buffered operation, surfaced at commit.
    latched_error: Option<ClientError>,
    versionstamp_senders: Vec<oneshot::Sender<Result<Vec<u8>, ClientError>>>,
}

impl TxState {
    fn new() -> Self {
        Self {
            snapshot: None,
            read_version_override: None,
            overlay: BTreeMap::new(),
            cleared: Vec::new(),
            versionstamped: Vec::new(),
            read_conflicts: Vec::new(),
            write_conflicts: Vec::new(),
            next_write_no_conflict: false,
            retry_limit: None,
            timeout_ms: None,
            retries: 0,
            cancelled: false,
            committed_version: -1,
            committed_stamp: None,
            latched_error: None,
            versionstamp_senders: Vec::new(),
        }
    }

    fn usable(&self) -> Result<(), ClientError> {
        if self.cancelled {
            return Err(ClientError::TRANSACTION_CANCELLED);
        }
        if self.committed_version >= 0 {
            return Err(ClientError::USED_DURING_COMMIT);
        }
        Ok(())
    }

    /// Take a snapshot of `store` if none exists yet.
    fn ensure_snapshot(&mut self, store: &Mutex<Store>) -> Result<&Snapshot, ClientError> {
        if self.snapshot.is_none() {
            let store = lock(store);
            let version = self.read_version_override.unwrap_or(store.version);
            if version > store.version {
                return Err(ClientError::FUTURE_VERSION);
            }
            self.snapshot = Some(Snapshot {
                version,
                map: store.map.clone(),
            });
        }
        Ok(self.snapshot.as_ref().expect("just ensured"))
    }

    /// The value `key` currently reads as inside this transaction.
    fn effective_get(&self, key: &[u8]) -> Option<Vec<u8>> {
        if let Some(write) = self.overlay.get(key) {
            return write.clone();
        }
        if in_ranges(&self.cleared, key) {
            return None;
        }
        self.snapshot.as_ref().and_then(|s| s.map.get(key).cloned())
    }

    /// Every `(key, value)` pair of `[begin, end)` as this transaction sees it.
    fn effective_entries(&self, begin: &[u8], end: &[u8]) -> Vec<KeyValue> {
        if begin >= end {
            return Vec::new();
        }
        let bounds = (Bound::Included(begin), Bound::Excluded(end));

        let mut merged = BTreeMap::new();
        if let Some(snapshot) = &self.snapshot {
            for (key, value) in snapshot.map.range::<[u8], _>(bounds) {
                if !in_ranges(&self.cleared, key) && !self.overlay.contains_key(key) {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, write) in self.overlay.range::<[u8], _>(bounds) {
            if let Some(value) = write {
                merged.insert(key.clone(), value.clone());
            }
        }
        merged.into_iter().collect()
    }

    /// Every key this transaction currently sees, in order.
    fn effective_keys(&self) -> Vec<Vec<u8>> {
        let mut keys = BTreeSet::new();
        if let Some(snapshot) = &self.snapshot {
            for key in snapshot.map.keys() {
                if !in_ranges(&self.cleared, key) && !self.overlay.contains_key(key) {
                    keys.insert(key.clone());
                }
            }
        }
        for (key, write) in &self.overlay {
            if write.is_some() {
                keys.insert(key.clone());
            }
        }
        keys.into_iter().collect()
    }

    /// Walk a [`KeySelector`] over the effective keyspace.
    fn resolve_selector(&self, selector: &KeySelector) -> Vec<u8> {
        let keys = self.effective_keys();
        let anchor = selector.key.as_slice();

        let base = if selector.or_equal {
            keys.partition_point(|k| k.as_slice() <= anchor)
        } else {
            keys.partition_point(|k| k.as_slice() < anchor)
        };
        // `base` counts keys at-or-before the anchor; the base *position*
        // is one behind it, offsets walk from there.
        let position = base as i64 - 1 + selector.offset;

        if position < 0 {
            Vec::new()
        } else if position >= keys.len() as i64 {
            KEYSPACE_END.to_vec()
        } else {
            keys[position as usize].clone()
        }
    }

    fn record_read(&mut self, range: Range, snapshot_read: bool) {
        if !snapshot_read {
            self.read_conflicts.push(range);
        }
    }

    fn record_write(&mut self, range: Range) {
        if self.next_write_no_conflict {
            self.next_write_no_conflict = false;
        } else {
            self.write_conflicts.push(range);
        }
    }
}

//---------------------------------------------------------------------------------------------------- Range helpers
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    // Lock poisoning means another thread panicked mid-operation; the data
    // is plain collections, so keep going with it.
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// The half-open range containing exactly `key`.
fn point_range(key: &[u8]) -> Range {
    let mut end = key.to_vec();
    end.push(0x00);
    (key.to_vec(), end)
}

fn ranges_overlap(a: &Range, b: &Range) -> bool {
    a.0 < b.1 && b.0 < a.1
}

fn in_ranges(ranges: &[Range], key: &[u8]) -> bool {
    ranges
        .iter()
        .any(|(begin, end)| begin.as_slice() <= key && key < end.as_slice())
}

/// The 10-byte versionstamp of a commit: 8 bytes of big-endian version
/// plus a 2-byte batch order (always zero here, one commit per version).
fn make_versionstamp(version: i64) -> Vec<u8> {
    let mut stamp = version.to_be_bytes().to_vec();
    stamp.extend_from_slice(&[0x00, 0x00]);
    stamp
}

/// Substitute the versionstamp into a payload carrying a 4-byte
/// little-endian offset trailer.
fn substitute_versionstamp(payload: &[u8], stamp: &[u8]) -> Result<Vec<u8>, ClientError> {
    let Some(trailer_at) = payload.len().checked_sub(4) else {
        return Err(ClientError::new(2000));
    };
    let offset =
        u32::from_le_bytes(payload[trailer_at..].try_into().expect("4 bytes")) as usize;
    let mut out = payload[..trailer_at].to_vec();
    if offset + stamp.len() > out.len() {
        return Err(ClientError::new(2000));
    }
    out[offset..offset + stamp.len()].copy_from_slice(stamp);
    Ok(out)
}

/// Normalise `value` to exactly `len` bytes, zero-extending or truncating
/// on the little-endian (most significant) side.
fn normalize(value: &[u8], len: usize) -> Vec<u8> {
    let mut out = value.to_vec();
    out.resize(len, 0x00);
    out
}

/// Little-endian unsigned comparison of two equal-length byte strings.
fn le_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    debug_assert_eq!(a.len(), b.len());
    a.iter().rev().cmp(b.iter().rev())
}

/// Apply a point atomic mutation, returning the new value (`None` clears).
///
/// Absent current values follow the wire contract: arithmetic treats them
/// as zero, the comparison families store the parameter outright.
fn apply_mutation(
    mutation: MutationType,
    current: Option<Vec<u8>>,
    param: &[u8],
) -> Option<Vec<u8>> {
    let Some(current) = current else {
        return match mutation {
            MutationType::CompareAndClear => None,
            _ => Some(param.to_vec()),
        };
    };

    match mutation {
        MutationType::Add => {
            let operand = normalize(&current, param.len());
            let mut out = vec![0x00; param.len()];
            let mut carry = 0_u16;
            for (i, byte) in out.iter_mut().enumerate() {
                let sum = u16::from(operand[i]) + u16::from(param[i]) + carry;
                *byte = sum as u8;
                carry = sum >> 8;
            }
            Some(out)
        }
        MutationType::BitAnd => {
            let operand = normalize(&current, param.len());
            Some(operand.iter().zip(param).map(|(a, b)| a & b).collect())
        }
        MutationType::BitOr => {
            let operand = normalize(&current, param.len());
            Some(operand.iter().zip(param).map(|(a, b)| a | b).collect())
        }
        MutationType::BitXor => {
            let operand = normalize(&current, param.len());
            Some(operand.iter().zip(param).map(|(a, b)| a ^ b).collect())
        }
        MutationType::AppendIfFits => {
            if current.len() + param.len() <= VALUE_SIZE_LIMIT {
                let mut out = current;
                out.extend_from_slice(param);
                Some(out)
            } else {
                Some(current)
            }
        }
        MutationType::Max => {
            let operand = normalize(&current, param.len());
            if le_cmp(&operand, param).is_ge() {
                Some(operand)
            } else {
                Some(param.to_vec())
            }
        }
        MutationType::Min => {
            let operand = normalize(&current, param.len());
            if le_cmp(&operand, param).is_le() {
                Some(operand)
            } else {
                Some(param.to_vec())
            }
        }
        MutationType::ByteMin => Some(std::cmp::min(current, param.to_vec())),
        MutationType::ByteMax => Some(std::cmp::max(current, param.to_vec())),
        MutationType::CompareAndClear => {
            if current == param {
                None
            } else {
                Some(current)
            }
        }
        // Handled at commit time, never here.
        MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue => {
            Some(current)
        }
    }
}

//---------------------------------------------------------------------------------------------------- Transaction impl
#[async_trait]
impl Transaction for MemTransaction {
    async fn get(&self, key: &[u8], snapshot: bool) -> Result<Option<Vec<u8>>, ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        state.ensure_snapshot(&self.store)?;
        state.record_read(point_range(key), snapshot);
        Ok(state.effective_get(key))
    }

    async fn get_key(
        &self,
        selector: KeySelector,
        snapshot: bool,
    ) -> Result<Vec<u8>, ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        state.ensure_snapshot(&self.store)?;
        let resolved = state.resolve_selector(&selector);
        if !resolved.is_empty() && resolved != KEYSPACE_END {
            state.record_read(point_range(&resolved), snapshot);
        }
        Ok(resolved)
    }

    async fn get_range(
        &self,
        begin: KeySelector,
        end: KeySelector,
        limit: usize,
        reverse: bool,
        _mode: StreamingMode,
        snapshot: bool,
    ) -> Result<Vec<KeyValue>, ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        state.ensure_snapshot(&self.store)?;

        let begin_key = state.resolve_selector(&begin);
        let end_key = state.resolve_selector(&end);

        let mut entries = state.effective_entries(&begin_key, &end_key);
        if reverse {
            entries.reverse();
        }
        if limit != 0 {
            entries.truncate(limit);
        }

        if begin_key < end_key {
            state.record_read((begin_key, end_key), snapshot);
        }
        Ok(entries)
    }

    fn set(&self, key: &[u8], value: &[u8]) {
        let mut state = lock(&self.state);
        if state.usable().is_err() {
            return;
        }
        state.record_write(point_range(key));
        state.overlay.insert(key.to_vec(), Some(value.to_vec()));
    }

    fn clear(&self, key: &[u8]) {
        let mut state = lock(&self.state);
        if state.usable().is_err() {
            return;
        }
        state.record_write(point_range(key));
        state.overlay.insert(key.to_vec(), None);
    }

    fn clear_range(&self, begin: &[u8], end: &[u8]) {
        let mut state = lock(&self.state);
        if state.usable().is_err() {
            return;
        }
        if end < begin {
            state.latched_error.get_or_insert(ClientError::INVERTED_RANGE);
            return;
        }
        state.record_write((begin.to_vec(), end.to_vec()));

        // Earlier buffered points inside the range are gone for good; the
        // range itself keeps masking the snapshot.
        let doomed: Vec<Vec<u8>> = state
            .overlay
            .range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end)))
            .map(|(key, _)| key.clone())
            .collect();
        for key in doomed {
            state.overlay.remove(&key);
        }
        state.cleared.push((begin.to_vec(), end.to_vec()));
    }

    fn atomic_op(&self, mutation: MutationType, key: &[u8], param: &[u8]) {
        let mut state = lock(&self.state);
        if state.usable().is_err() {
            return;
        }
        state.record_write(point_range(key));

        match mutation {
            MutationType::SetVersionstampedKey | MutationType::SetVersionstampedValue => {
                state
                    .versionstamped
                    .push((mutation, key.to_vec(), param.to_vec()));
            }
            _ => {
                if state.ensure_snapshot(&self.store).is_err() {
                    return;
                }
                let current = state.effective_get(key);
                let next = apply_mutation(mutation, current, param);
                state.overlay.insert(key.to_vec(), next);
            }
        }
    }

    fn add_conflict_range(
        &self,
        begin: &[u8],
        end: &[u8],
        kind: ConflictRangeType,
    ) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        if end < begin {
            return Err(ClientError::INVERTED_RANGE);
        }
        let range = (begin.to_vec(), end.to_vec());
        match kind {
            ConflictRangeType::Read => state.read_conflicts.push(range),
            ConflictRangeType::Write => state.write_conflicts.push(range),
        }
        Ok(())
    }

    fn set_option(&self, option: TransactionOption) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        match option {
            TransactionOption::NextWriteNoWriteConflictRange => {
                state.next_write_no_conflict = true;
            }
            TransactionOption::Timeout(ms) => {
                if ms < 0 {
                    return Err(ClientError::INVALID_OPTION);
                }
                state.timeout_ms = Some(ms);
            }
            TransactionOption::RetryLimit(limit) => {
                if limit < 0 {
                    return Err(ClientError::INVALID_OPTION);
                }
                state.retry_limit = Some(limit);
            }
        }
        Ok(())
    }

    async fn commit(&self) -> Result<(), ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        if let Some(error) = state.latched_error {
            return Err(error);
        }

        let mut store = lock(&self.store);
        let read_version = state
            .snapshot
            .as_ref()
            .map(|s| s.version)
            .or(state.read_version_override)
            .unwrap_or(store.version);

        // A snapshot older than the kept commit log can not be validated.
        if let Some(oldest) = store.commits.front() {
            if read_version < oldest.version - 1 && !state.read_conflicts.is_empty() {
                return Err(ClientError::TRANSACTION_TOO_OLD);
            }
        }

        for record in &store.commits {
            if record.version <= read_version {
                continue;
            }
            for write in &record.writes {
                if state.read_conflicts.iter().any(|r| ranges_overlap(r, write)) {
                    trace!(conflict_version = record.version, "commit conflict");
                    return Err(ClientError::NOT_COMMITTED);
                }
            }
        }

        let commit_version = store.version + 1;
        let stamp = make_versionstamp(commit_version);

        // Resolve versionstamped payloads up front so a malformed offset
        // trailer fails the commit before anything is applied.
        let mut stamped = Vec::with_capacity(state.versionstamped.len());
        for (mutation, key, param) in &state.versionstamped {
            match mutation {
                MutationType::SetVersionstampedKey => {
                    stamped.push((substitute_versionstamp(key, &stamp)?, param.clone()));
                }
                MutationType::SetVersionstampedValue => {
                    stamped.push((key.clone(), substitute_versionstamp(param, &stamp)?));
                }
                _ => unreachable!("only versionstamped mutations are deferred"),
            }
        }

        store.version = commit_version;
        for (begin, end) in &state.cleared {
            let doomed: Vec<Vec<u8>> = store
                .map
                .range::<[u8], _>((Bound::Included(begin.as_slice()), Bound::Excluded(end.as_slice())))
                .map(|(key, _)| key.clone())
                .collect();
            for key in doomed {
                store.map.remove(&key);
            }
        }
        for (key, write) in &state.overlay {
            match write {
                Some(value) => store.map.insert(key.clone(), value.clone()),
                None => store.map.remove(key),
            };
        }
        for (key, value) in stamped {
            store.map.insert(key, value);
        }

        store.commits.push_back(CommitRecord {
            version: commit_version,
            writes: state.write_conflicts.clone(),
        });
        if store.commits.len() > COMMIT_LOG_LIMIT {
            store.commits.pop_front();
        }
        drop(store);

        trace!(commit_version, "committed");
        state.committed_version = commit_version;
        state.committed_stamp = Some(stamp.clone());
        for sender in state.versionstamp_senders.drain(..) {
            drop(sender.send(Ok(stamp.clone())));
        }
        Ok(())
    }

    fn reset(&self) {
        *lock(&self.state) = TxState::new();
    }

    fn cancel(&self) {
        let mut state = lock(&self.state);
        state.cancelled = true;
        for sender in state.versionstamp_senders.drain(..) {
            drop(sender.send(Err(ClientError::TRANSACTION_CANCELLED)));
        }
    }

    async fn on_error(&self, code: i32) -> Result<(), ClientError> {
        let error = ClientError::new(code);
        if !error.retryable() {
            return Err(error);
        }

        {
            let mut state = lock(&self.state);
            if let Some(limit) = state.retry_limit {
                if state.retries >= limit {
                    return Err(error);
                }
            }
            let retries = state.retries + 1;
            let senders = std::mem::take(&mut state.versionstamp_senders);
            let (retry_limit, timeout_ms) = (state.retry_limit, state.timeout_ms);

            *state = TxState::new();
            state.retries = retries;
            state.retry_limit = retry_limit;
            state.timeout_ms = timeout_ms;
            state.versionstamp_senders = senders;
        }

        tokio::time::sleep(RETRY_BACKOFF).await;
        Ok(())
    }

    async fn get_read_version(&self) -> Result<i64, ClientError> {
        let mut state = lock(&self.state);
        state.usable()?;
        let snapshot = state.ensure_snapshot(&self.store)?;
        Ok(snapshot.version)
    }

    fn set_read_version(&self, version: i64) {
        let mut state = lock(&self.state);
        if state.usable().is_err() {
            return;
        }
        state.read_version_override = Some(version);
    }

    fn get_committed_version(&self) -> i64 {
        lock(&self.state).committed_version
    }

    fn get_versionstamp(&self) -> Versionstamp {
        let (sender, receiver) = oneshot::channel();
        let mut state = lock(&self.state);
        match (&state.committed_stamp, state.cancelled) {
            (Some(stamp), _) => drop(sender.send(Ok(stamp.clone()))),
            (None, true) => drop(sender.send(Err(ClientError::TRANSACTION_CANCELLED))),
            (None, false) => state.versionstamp_senders.push(sender),
        }
        Versionstamp::new(receiver)
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::transaction::run_retriable;

    fn db() -> MemDatabase {
        MemDatabase::new()
    }

    fn tx(db: &MemDatabase) -> Arc<dyn Transaction> {
        db.create_transaction().unwrap()
    }

    async fn seed(db: &MemDatabase, pairs: &[(&[u8], &[u8])]) {
        let t = tx(db);
        for (key, value) in pairs {
            t.set(key, value);
        }
        t.commit().await.unwrap();
    }

    #[tokio::test]
    async fn set_commit_get() {
        let db = db();
        seed(&db, &[(b"k", b"v")]).await;

        let t = tx(&db);
        assert_eq!(t.get(b"k", false).await.unwrap(), Some(b"v".to_vec()));
        assert_eq!(t.get(b"absent", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_your_writes() {
        let db = db();
        seed(&db, &[(b"a", b"1"), (b"b", b"2")]).await;

        let t = tx(&db);
        t.set(b"c", b"3");
        t.clear(b"a");
        assert_eq!(t.get(b"c", false).await.unwrap(), Some(b"3".to_vec()));
        assert_eq!(t.get(b"a", false).await.unwrap(), None);

        t.clear_range(b"b", b"d");
        assert_eq!(t.get(b"b", false).await.unwrap(), None);
        assert_eq!(t.get(b"c", false).await.unwrap(), None);

        t.set(b"c", b"4");
        assert_eq!(t.get(b"c", false).await.unwrap(), Some(b"4".to_vec()));
    }

    #[tokio::test]
    async fn inverted_clear_range_surfaces_at_commit() {
        let db = db();
        let t = tx(&db);
        t.clear_range(b"m", b"a");
        assert_eq!(
            t.commit().await.unwrap_err(),
            ClientError::INVERTED_RANGE
        );
    }

    #[tokio::test]
    async fn selector_resolution() {
        let db = db();
        seed(&db, &[(b"a", b"1"), (b"c", b"2"), (b"e", b"3")]).await;
        let t = tx(&db);

        let k = t
            .get_key(KeySelector::first_greater_or_equal(b"b".to_vec()), false)
            .await
            .unwrap();
        assert_eq!(k, b"c".to_vec());

        let k = t
            .get_key(KeySelector::last_less_than(b"c".to_vec()), false)
            .await
            .unwrap();
        assert_eq!(k, b"a".to_vec());

        let k = t
            .get_key(KeySelector::first_greater_than(b"e".to_vec()), false)
            .await
            .unwrap();
        assert_eq!(k, KEYSPACE_END.to_vec());

        let k = t
            .get_key(KeySelector::last_less_than(b"a".to_vec()), false)
            .await
            .unwrap();
        assert_eq!(k, Vec::<u8>::new());
    }

    #[tokio::test]
    async fn range_reads() {
        let db = db();
        seed(&db, &[(b"a", b"1"), (b"b", b"2"), (b"c", b"3")]).await;
        let t = tx(&db);

        let all = t
            .get_range(
                KeySelector::first_greater_or_equal(b"a".to_vec()),
                KeySelector::first_greater_or_equal(b"z".to_vec()),
                0,
                false,
                StreamingMode::WantAll,
                false,
            )
            .await
            .unwrap();
        assert_eq!(
            all,
            vec![
                (b"a".to_vec(), b"1".to_vec()),
                (b"b".to_vec(), b"2".to_vec()),
                (b"c".to_vec(), b"3".to_vec()),
            ]
        );

        let last_two = t
            .get_range(
                KeySelector::first_greater_or_equal(b"a".to_vec()),
                KeySelector::first_greater_or_equal(b"z".to_vec()),
                2,
                true,
                StreamingMode::WantAll,
                false,
            )
            .await
            .unwrap();
        assert_eq!(
            last_two,
            vec![(b"c".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"2".to_vec())]
        );
    }

    #[tokio::test]
    async fn conflicting_write_aborts_reader() {
        let db = db();
        seed(&db, &[(b"k", b"0")]).await;

        let reader = tx(&db);
        assert_eq!(reader.get(b"k", false).await.unwrap(), Some(b"0".to_vec()));

        let writer = tx(&db);
        writer.set(b"k", b"1");
        writer.commit().await.unwrap();

        reader.set(b"other", b"x");
        assert_eq!(
            reader.commit().await.unwrap_err(),
            ClientError::NOT_COMMITTED
        );
    }

    #[tokio::test]
    async fn snapshot_read_does_not_conflict() {
        let db = db();
        seed(&db, &[(b"k", b"0")]).await;

        let reader = tx(&db);
        assert_eq!(reader.get(b"k", true).await.unwrap(), Some(b"0".to_vec()));

        let writer = tx(&db);
        writer.set(b"k", b"1");
        writer.commit().await.unwrap();

        reader.set(b"other", b"x");
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn no_write_conflict_option() {
        let db = db();
        seed(&db, &[(b"k", b"0")]).await;

        // The reader takes a conflict range on `k`, then a rival writes `k`
        // under the no-conflict option; the reader must still commit.
        let reader = tx(&db);
        assert_eq!(reader.get(b"k", false).await.unwrap(), Some(b"0".to_vec()));

        let quiet = tx(&db);
        quiet
            .set_option(TransactionOption::NextWriteNoWriteConflictRange)
            .unwrap();
        quiet.set(b"k", b"1");
        quiet.commit().await.unwrap();

        reader.set(b"other", b"x");
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn atomic_add_and_friends() {
        let db = db();
        let t = tx(&db);
        t.atomic_op(MutationType::Add, b"n", &[0x05, 0x00]);
        t.atomic_op(MutationType::Add, b"n", &[0xff, 0x00]);
        t.commit().await.unwrap();

        let t = tx(&db);
        // 5 + 255 = 260 = 0x0104 little-endian.
        assert_eq!(t.get(b"n", false).await.unwrap(), Some(vec![0x04, 0x01]));

        t.atomic_op(MutationType::ByteMin, b"n", &[0x03]);
        assert!(t.get(b"n", false).await.unwrap().unwrap() == vec![0x03]);
        t.atomic_op(MutationType::ByteMax, b"n", &[0xff, 0xff]);
        assert_eq!(t.get(b"n", false).await.unwrap(), Some(vec![0xff, 0xff]));
        t.atomic_op(MutationType::CompareAndClear, b"n", &[0xff, 0xff]);
        assert_eq!(t.get(b"n", false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn versionstamped_key_substitution() {
        let db = db();
        let t = tx(&db);

        // 4-byte prefix, 10-byte placeholder, offset trailer pointing at it.
        let mut key = b"key-".to_vec();
        key.extend_from_slice(&[0x00; 10]);
        key.extend_from_slice(&4_u32.to_le_bytes());
        t.atomic_op(MutationType::SetVersionstampedKey, &key, b"val");

        let stamp_future = t.get_versionstamp();
        t.commit().await.unwrap();
        let stamp = stamp_future.await.unwrap();
        assert_eq!(stamp.len(), 10);

        let mut expected = b"key-".to_vec();
        expected.extend_from_slice(&stamp);

        let t = tx(&db);
        assert_eq!(t.get(&expected, false).await.unwrap(), Some(b"val".to_vec()));
    }

    #[tokio::test]
    async fn versionstamp_without_commit_fails() {
        let db = db();
        let t = tx(&db);
        let stamp_future = t.get_versionstamp();
        t.cancel();
        assert_eq!(
            stamp_future.await.unwrap_err(),
            ClientError::TRANSACTION_CANCELLED
        );
    }

    #[tokio::test]
    async fn cancelled_transaction_rejects_reads() {
        let db = db();
        let t = tx(&db);
        t.cancel();
        assert_eq!(
            t.get(b"k", false).await.unwrap_err(),
            ClientError::TRANSACTION_CANCELLED
        );
    }

    #[tokio::test]
    async fn retry_loop_reruns_conflicted_body() {
        let db = db();
        seed(&db, &[(b"counter", &1_i64.to_le_bytes())]).await;

        // First attempt loses a race; run_retriable must converge anyway.
        let raced = Arc::new(Mutex::new(false));
        let db_for_body = db.clone();
        let raced_for_body = Arc::clone(&raced);

        let value = run_retriable(&db, move |t| {
            let db = db_for_body.clone();
            let raced = Arc::clone(&raced_for_body);
            Box::pin(async move {
                let current = t.get(b"counter", false).await?.unwrap_or_default();

                let should_race = {
                    let mut already = lock(&raced);
                    if *already {
                        false
                    } else {
                        *already = true;
                        true
                    }
                };
                if should_race {
                    // A competing writer commits between our read and commit.
                    let rival = db.create_transaction()?;
                    rival.set(b"counter", &7_i64.to_le_bytes());
                    rival.commit().await?;
                }

                t.set(b"read-back", &current);
                Ok(current)
            })
        })
        .await
        .unwrap();

        // The successful attempt observed the rival's write.
        assert_eq!(value, 7_i64.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn on_error_rethrows_fatal_codes() {
        let db = db();
        let t = tx(&db);
        assert_eq!(
            t.on_error(ClientError::INVERTED_RANGE.code).await.unwrap_err(),
            ClientError::INVERTED_RANGE
        );
        t.on_error(ClientError::NOT_COMMITTED.code).await.unwrap();
    }

    #[tokio::test]
    async fn future_read_version_rejected() {
        let db = db();
        let t = tx(&db);
        t.set_read_version(9_999);
        assert_eq!(
            t.get(b"k", false).await.unwrap_err(),
            ClientError::FUTURE_VERSION
        );
    }

    #[tokio::test]
    async fn committed_version_increases() {
        let db = db();
        let t = tx(&db);
        assert_eq!(t.get_committed_version(), -1);
        t.set(b"a", b"1");
        t.commit().await.unwrap();
        let first = t.get_committed_version();

        let t = tx(&db);
        t.set(b"a", b"2");
        t.commit().await.unwrap();
        assert!(t.get_committed_version() > first);
    }
}
