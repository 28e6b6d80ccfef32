//! The opcode interpreter; `struct StackMachine`.
//!
//! Execution is serial by command: the program counter only advances once
//! the current opcode has fully completed. Parallelism exists anyway,
//! because most database results are pushed as unresolved
//! [`Pending`] slots and only materialise when some later opcode pops them.

//---------------------------------------------------------------------------------------------------- Import
use std::{
    collections::HashMap,
    sync::{Arc, LazyLock, Mutex, MutexGuard},
};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use galena_client::{
    prefix_range_end, run_retriable, strinc, ClientError, ConflictRangeType, Database,
    KeySelector, KeyValue, MutationType, StreamingMode, Transaction, TransactionOption,
};
use galena_tuple::{child_range, pack, pack_element, unpack, Element};

use crate::{
    command::{Command, Opcode},
    constants::{
        ERROR_TAG, GOT_COMMITTED_VERSION, GOT_READ_VERSION, LOG_VALUE_LIMIT, SET_CONFLICT_KEY,
        SET_CONFLICT_RANGE, WAITED_FOR_EMPTY,
    },
    error::MachineError,
    pending::Pending,
    stack::Stack,
    value::StackValue,
};

//---------------------------------------------------------------------------------------------------- StackMachine
/// One interpreter instance: a program prefix, a deferred stack, and a
/// registry of named transactions against a shared database handle.
pub struct StackMachine {
    db: Arc<dyn Database>,
    prefix: Vec<u8>,
    stack: Stack,
    /// The named-transaction registry. Dereferencing a missing name creates
    /// a fresh transaction, so `current_name` always resolves.
    transactions: HashMap<String, Arc<dyn Transaction>>,
    current_name: String,
    /// The version captured by the most recent `GET_READ_VERSION` /
    /// `GET_COMMITTED_VERSION`, fed back by `SET_READ_VERSION`.
    last_seen_version: i64,
}

impl StackMachine {
    /// A machine rooted at `prefix`, with its registry seeded with the
    /// blank-name transaction.
    pub fn new(db: Arc<dyn Database>, prefix: Vec<u8>) -> Result<Self, MachineError> {
        let mut transactions: HashMap<String, Arc<dyn Transaction>> = HashMap::new();
        transactions.insert(String::new(), db.create_transaction()?);
        let current_name = String::from_utf8_lossy(&prefix).into_owned();

        Ok(Self {
            db,
            prefix,
            stack: Stack::new(),
            transactions,
            current_name,
            last_seen_version: -1,
        })
    }

    /// The key prefix this machine's program was read from.
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// How many slots the stack currently holds.
    pub fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Execute a whole program. A returned error means the run ended early;
    /// binding errors never surface here, only interpreter and fatal ones.
    pub async fn run(&mut self, commands: &[Command]) -> Result<(), MachineError> {
        for (index, command) in commands.iter().enumerate() {
            let depth = self.stack.len();
            println!("Executing {command} {index} - Stack {depth}");
            self.execute(index as u64, command).await?;
        }
        Ok(())
    }

    //------------------------------------------------ Registry
    /// The transaction `current_name` points at, created on demand.
    fn current_transaction(&mut self) -> Result<Arc<dyn Transaction>, MachineError> {
        if !self.transactions.contains_key(&self.current_name) {
            let tx = self.db.create_transaction()?;
            self.transactions.insert(self.current_name.clone(), tx);
        }
        Ok(Arc::clone(&self.transactions[&self.current_name]))
    }

    //------------------------------------------------ Pop helpers
    /// Pop and materialise the top slot, translating binding errors into
    /// the `("ERROR", code)` envelope. Everything else propagates.
    pub async fn pop_value(&mut self) -> Result<StackValue, MachineError> {
        match self.stack.pop().resolve().await {
            Ok(value) => Ok(value),
            Err(MachineError::Client(e)) => Ok(error_envelope(e.code)),
            Err(other) => Err(other),
        }
    }

    async fn pop_int(&mut self) -> Result<i64, MachineError> {
        self.pop_value().await?.into_int()
    }

    async fn pop_bytes(&mut self) -> Result<Vec<u8>, MachineError> {
        self.pop_value().await?.into_bytes()
    }

    async fn pop_string(&mut self) -> Result<String, MachineError> {
        self.pop_value().await?.into_string()
    }

    /// Pop one full selector: its components were pushed anchor-first, so
    /// they come back offset, or-equal, anchor.
    async fn pop_selector(&mut self) -> Result<KeySelector, MachineError> {
        let offset = self.pop_int().await?;
        let or_equal = self.pop_int().await? != 0;
        let anchor = self.pop_bytes().await?;
        Ok(KeySelector::new(anchor, or_equal, offset))
    }

    //------------------------------------------------ Dispatch
    async fn execute(&mut self, index: u64, command: &Command) -> Result<(), MachineError> {
        match command.opcode {
            //------------------------------------------------ Stack
            Opcode::Push => {
                let value = command
                    .argument
                    .clone()
                    .ok_or(MachineError::PushedEmptyValue)?;
                self.stack.push(index, value);
            }
            Opcode::Dup => self.stack.dup()?,
            Opcode::EmptyStack => self.stack.clear(),
            Opcode::Pop => {
                // Consumed without being materialised.
                drop(self.stack.pop());
            }
            Opcode::Swap => {
                let distance = self.pop_int().await?;
                let distance =
                    usize::try_from(distance).map_err(|_| MachineError::IllegalValueType)?;
                self.stack.swap(distance)?;
            }
            Opcode::Sub => {
                let subtrahend = self.pop_int().await?;
                let minuend = self.pop_int().await?;
                self.stack
                    .push(index, StackValue::Int(minuend.wrapping_sub(subtrahend)));
            }
            Opcode::Concat => {
                let tail = self.pop_value().await?;
                let head = self.pop_value().await?;
                let joined = match (head, tail) {
                    (StackValue::Bytes(mut a), StackValue::Bytes(b)) => {
                        a.extend_from_slice(&b);
                        StackValue::Bytes(a)
                    }
                    (StackValue::String(mut a), StackValue::String(b)) => {
                        a.push_str(&b);
                        StackValue::String(a)
                    }
                    _ => return Err(MachineError::IllegalValueType),
                };
                self.stack.push(index, joined);
            }
            Opcode::LogStack => self.log_stack().await?,

            //------------------------------------------------ Transactions
            Opcode::NewTransaction => {
                let tx = self.db.create_transaction()?;
                self.transactions.insert(self.current_name.clone(), tx);
            }
            Opcode::UseTransaction => {
                self.current_name = self.pop_string().await?;
                self.current_transaction()?;
            }
            Opcode::Reset => self.current_transaction()?.reset(),
            Opcode::Cancel => self.current_transaction()?.cancel(),
            Opcode::Commit => {
                let tx = self.current_transaction()?;
                self.stack.push_pending(
                    index,
                    Pending::new(async move {
                        tx.commit().await?;
                        Ok(StackValue::ResultNotPresent)
                    }),
                );
            }
            Opcode::OnError => {
                let code = self.pop_int().await?;
                let tx = self.current_transaction()?;
                self.stack.push_pending(
                    index,
                    Pending::new(async move {
                        tx.on_error(code as i32).await?;
                        Ok(StackValue::ResultNotPresent)
                    }),
                );
            }
            Opcode::GetReadVersion => {
                let tx = self.current_transaction()?;
                match tx.get_read_version().await {
                    Ok(version) => {
                        self.last_seen_version = version;
                        self.stack
                            .push(index, StackValue::Bytes(GOT_READ_VERSION.to_vec()));
                    }
                    Err(e) => self.stack.push_pending(index, Pending::failed(e.into())),
                }
            }
            Opcode::SetReadVersion => {
                let version = self.last_seen_version;
                self.current_transaction()?.set_read_version(version);
            }
            Opcode::GetCommittedVersion => {
                self.last_seen_version = self.current_transaction()?.get_committed_version();
                self.stack
                    .push(index, StackValue::Bytes(GOT_COMMITTED_VERSION.to_vec()));
            }
            Opcode::GetVersionstamp => {
                let stamp = self.current_transaction()?.get_versionstamp();
                self.stack.push_pending(
                    index,
                    Pending::new(async move { Ok(StackValue::Bytes(stamp.await?)) }),
                );
            }
            Opcode::WaitFuture => {
                let item = self
                    .stack
                    .pop_item()
                    .ok_or(MachineError::PoppedEmptyStack)?;
                // Resolve in place; the slot goes back with its original
                // producer tag, binding errors still surface at the final pop.
                match item.pending.resolve().await {
                    Ok(_) | Err(MachineError::Client(_)) => self.stack.push_item(item),
                    Err(other) => return Err(other),
                }
            }

            //------------------------------------------------ Reads
            Opcode::Get => {
                let key = self.pop_bytes().await?;
                let pending = if command.direct {
                    let db = Arc::clone(&self.db);
                    Pending::new(async move {
                        let value = run_retriable(db.as_ref(), move |tx| {
                            let key = key.clone();
                            async move { tx.get(&key, false).await }.boxed()
                        })
                        .await?;
                        Ok(option_value(value))
                    })
                } else {
                    let tx = self.current_transaction()?;
                    let snapshot = command.snapshot;
                    Pending::new(
                        async move { Ok(option_value(tx.get(&key, snapshot).await?)) },
                    )
                };
                self.stack.push_pending(index, pending);
            }
            Opcode::GetKey => {
                let prefix = self.pop_bytes().await?;
                let selector = self.pop_selector().await?;
                let pending = if command.direct {
                    let db = Arc::clone(&self.db);
                    Pending::new(async move {
                        let key = run_retriable(db.as_ref(), move |tx| {
                            let selector = selector.clone();
                            async move { tx.get_key(selector, false).await }.boxed()
                        })
                        .await?;
                        Ok(StackValue::Bytes(clamp_to_prefix(key, &prefix)))
                    })
                } else {
                    let tx = self.current_transaction()?;
                    let snapshot = command.snapshot;
                    Pending::new(async move {
                        let key = tx.get_key(selector, snapshot).await?;
                        Ok(StackValue::Bytes(clamp_to_prefix(key, &prefix)))
                    })
                };
                self.stack.push_pending(index, pending);
            }
            Opcode::GetRange => {
                let mode_code = self.pop_int().await?;
                let reverse = self.pop_int().await? != 0;
                let limit = read_limit(self.pop_int().await?);
                let end = self.pop_bytes().await?;
                let begin = self.pop_bytes().await?;

                let Some(mode) = StreamingMode::from_code(mode_code) else {
                    self.stack.push_pending(
                        index,
                        Pending::failed(MachineError::IllegalStreamingMode(mode_code)),
                    );
                    return Ok(());
                };
                let begin = KeySelector::first_greater_or_equal(begin);
                let end = KeySelector::first_greater_or_equal(end);
                let pending =
                    self.range_pending(command, begin, end, limit, reverse, mode, None)?;
                self.stack.push_pending(index, pending);
            }
            Opcode::GetRangeStartsWith => {
                let mode_code = self.pop_int().await?;
                let reverse = self.pop_int().await? != 0;
                let limit = read_limit(self.pop_int().await?);
                let prefix = self.pop_bytes().await?;

                let Some(mode) = StreamingMode::from_code(mode_code) else {
                    self.stack.push_pending(
                        index,
                        Pending::failed(MachineError::IllegalStreamingMode(mode_code)),
                    );
                    return Ok(());
                };
                let begin = KeySelector::first_greater_or_equal(prefix.clone());
                let end = KeySelector::first_greater_or_equal(prefix_range_end(&prefix));
                let pending =
                    self.range_pending(command, begin, end, limit, reverse, mode, None)?;
                self.stack.push_pending(index, pending);
            }
            Opcode::GetRangeSelector => {
                let prefix = self.pop_bytes().await?;
                let mode_code = self.pop_int().await?;
                let reverse = self.pop_int().await? != 0;
                let limit = read_limit(self.pop_int().await?);
                let end = self.pop_selector().await?;
                let begin = self.pop_selector().await?;

                let Some(mode) = StreamingMode::from_code(mode_code) else {
                    self.stack.push_pending(
                        index,
                        Pending::failed(MachineError::IllegalStreamingMode(mode_code)),
                    );
                    return Ok(());
                };
                let pending = self
                    .range_pending(command, begin, end, limit, reverse, mode, Some(prefix))?;
                self.stack.push_pending(index, pending);
            }

            //------------------------------------------------ Writes
            Opcode::Set => {
                let value = self.pop_bytes().await?;
                let key = self.pop_bytes().await?;
                if command.direct {
                    let db = Arc::clone(&self.db);
                    self.stack.push_pending(
                        index,
                        Pending::new(async move {
                            run_retriable(db.as_ref(), move |tx| {
                                let (key, value) = (key.clone(), value.clone());
                                async move {
                                    tx.set(&key, &value);
                                    Ok(())
                                }
                                .boxed()
                            })
                            .await?;
                            Ok(StackValue::ResultNotPresent)
                        }),
                    );
                } else {
                    self.current_transaction()?.set(&key, &value);
                }
            }
            Opcode::Clear => {
                let key = self.pop_bytes().await?;
                if command.direct {
                    let db = Arc::clone(&self.db);
                    self.stack.push_pending(
                        index,
                        Pending::new(async move {
                            run_retriable(db.as_ref(), move |tx| {
                                let key = key.clone();
                                async move {
                                    tx.clear(&key);
                                    Ok(())
                                }
                                .boxed()
                            })
                            .await?;
                            Ok(StackValue::ResultNotPresent)
                        }),
                    );
                } else {
                    self.current_transaction()?.clear(&key);
                }
            }
            Opcode::ClearRange => {
                let end = self.pop_bytes().await?;
                let begin = self.pop_bytes().await?;
                self.clear_range(index, command, begin, end)?;
            }
            Opcode::ClearRangeStartsWith => {
                let prefix = self.pop_bytes().await?;
                let end = prefix_range_end(&prefix);
                self.clear_range(index, command, prefix, end)?;
            }
            Opcode::AtomicOp => {
                let param = self.pop_bytes().await?;
                let key = self.pop_bytes().await?;
                let name = self.pop_string().await?;
                let mutation = MutationType::from_wire_name(&name)
                    .ok_or(MachineError::IllegalValueType)?;

                if command.direct {
                    let db = Arc::clone(&self.db);
                    self.stack.push_pending(
                        index,
                        Pending::new(async move {
                            run_retriable(db.as_ref(), move |tx| {
                                let (key, param) = (key.clone(), param.clone());
                                async move {
                                    tx.atomic_op(mutation, &key, &param);
                                    Ok(())
                                }
                                .boxed()
                            })
                            .await?;
                            Ok(StackValue::ResultNotPresent)
                        }),
                    );
                } else {
                    self.current_transaction()?.atomic_op(mutation, &key, &param);
                }
            }

            //------------------------------------------------ Conflicts
            Opcode::ReadConflictKey | Opcode::WriteConflictKey => {
                let key = self.pop_bytes().await?;
                let kind = conflict_kind(command.opcode);
                let end = point_end(&key);
                match self
                    .current_transaction()?
                    .add_conflict_range(&key, &end, kind)
                {
                    Ok(()) => self
                        .stack
                        .push(index, StackValue::Bytes(SET_CONFLICT_KEY.to_vec())),
                    Err(e) => self.stack.push_pending(index, Pending::failed(e.into())),
                }
            }
            Opcode::ReadConflictRange | Opcode::WriteConflictRange => {
                let end = self.pop_bytes().await?;
                let begin = self.pop_bytes().await?;
                let kind = conflict_kind(command.opcode);
                match self
                    .current_transaction()?
                    .add_conflict_range(&begin, &end, kind)
                {
                    Ok(()) => self
                        .stack
                        .push(index, StackValue::Bytes(SET_CONFLICT_RANGE.to_vec())),
                    Err(e) => self.stack.push_pending(index, Pending::failed(e.into())),
                }
            }
            Opcode::DisableWriteConflict => {
                if let Err(error) = self
                    .current_transaction()?
                    .set_option(TransactionOption::NextWriteNoWriteConflictRange)
                {
                    warn!(%error, "DISABLE_WRITE_CONFLICT ignored");
                }
            }

            //------------------------------------------------ Tuple layer
            Opcode::TuplePack => {
                let count = self.pop_int().await?;
                let mut elements = Vec::new();
                for _ in 0..count {
                    elements.push(self.pop_value().await?.into_element());
                }
                self.stack.push(index, StackValue::Bytes(pack(&elements)));
            }
            Opcode::TupleUnpack => {
                let bytes = self.pop_bytes().await?;
                for element in unpack(&bytes)? {
                    self.stack
                        .push(index, StackValue::Bytes(pack_element(&element)));
                }
            }
            Opcode::TupleRange => {
                let count = self.pop_int().await?;
                let mut elements = Vec::new();
                for _ in 0..count {
                    elements.push(self.pop_value().await?.into_element());
                }
                let (begin, end) = child_range(&elements);
                self.stack.push(index, StackValue::Bytes(begin));
                self.stack.push(index, StackValue::Bytes(end));
            }
            Opcode::TupleSort => {
                let count = self.pop_int().await?;
                let mut tuples = Vec::new();
                for _ in 0..count {
                    let bytes = self.pop_bytes().await?;
                    tuples.push(unpack(&bytes)?);
                }
                tuples.sort();
                for tuple in tuples {
                    self.stack.push(index, StackValue::Bytes(pack(&tuple)));
                }
            }

            //------------------------------------------------ Float helpers
            Opcode::EncodeFloat => {
                let bytes = self.pop_bytes().await?;
                let array: [u8; 4] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| MachineError::IllegalValueType)?;
                self.stack
                    .push(index, StackValue::Float(f32::from_be_bytes(array)));
            }
            Opcode::EncodeDouble => {
                let bytes = self.pop_bytes().await?;
                let array: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| MachineError::IllegalValueType)?;
                self.stack
                    .push(index, StackValue::Double(f64::from_be_bytes(array)));
            }
            Opcode::DecodeFloat => match self.pop_value().await? {
                StackValue::Float(f) => self
                    .stack
                    .push(index, StackValue::Bytes(f.to_be_bytes().to_vec())),
                _ => return Err(MachineError::IllegalValueType),
            },
            Opcode::DecodeDouble => match self.pop_value().await? {
                StackValue::Double(f) => self
                    .stack
                    .push(index, StackValue::Bytes(f.to_be_bytes().to_vec())),
                _ => return Err(MachineError::IllegalValueType),
            },

            //------------------------------------------------ Threading
            Opcode::StartThread => {
                let prefix = self.pop_bytes().await?;
                spawn_machine(Arc::clone(&self.db), prefix);
            }
            Opcode::WaitEmpty => {
                let prefix = self.pop_bytes().await?;
                let db = Arc::clone(&self.db);
                run_retriable(db.as_ref(), move |tx| {
                    let begin = prefix.clone();
                    let end = prefix_range_end(&prefix);
                    async move {
                        let rows = tx
                            .get_range(
                                KeySelector::first_greater_or_equal(begin),
                                KeySelector::first_greater_or_equal(end),
                                1,
                                false,
                                StreamingMode::WantAll,
                                false,
                            )
                            .await?;
                        if rows.is_empty() {
                            Ok(())
                        } else {
                            // Retryable, so the loop re-reads until the
                            // range drains.
                            Err(ClientError::NOT_COMMITTED)
                        }
                    }
                    .boxed()
                })
                .await?;
                self.stack
                    .push(index, StackValue::Bytes(WAITED_FOR_EMPTY.to_vec()));
            }

            // Unit tests run out-of-band via `cargo test`.
            Opcode::UnitTests => {}
        }
        Ok(())
    }

    //------------------------------------------------ Multi-step opcodes
    /// `LOG_STACK`: persist every slot under `prefix ‖ pack(stack_index,
    /// producer_index)` in one retriable transaction, then leave the stack
    /// empty.
    async fn log_stack(&mut self) -> Result<(), MachineError> {
        let log_prefix = self.pop_bytes().await?;
        let items = self.stack.take_items();

        // Materialise highest stack index first, translating binding
        // errors exactly as a pop would.
        let mut entries = Vec::with_capacity(items.len());
        for (stack_index, item) in items.iter().enumerate().rev() {
            let value = match item.pending.resolve().await {
                Ok(value) => value,
                Err(MachineError::Client(e)) => error_envelope(e.code),
                Err(other) => return Err(other),
            };

            let mut key = log_prefix.clone();
            key.extend_from_slice(&pack(&[
                Element::Int(stack_index as i64),
                Element::Int(item.producer_index as i64),
            ]));

            let mut packed = pack_element(&value.into_element());
            packed.truncate(LOG_VALUE_LIMIT);
            entries.push((key, packed));
        }

        let db = Arc::clone(&self.db);
        run_retriable(db.as_ref(), move |tx| {
            let entries = entries.clone();
            async move {
                for (key, value) in &entries {
                    tx.set(key, value);
                }
                Ok(())
            }
            .boxed()
        })
        .await?;
        Ok(())
    }

    /// Shared body of the `CLEAR_RANGE` variants.
    fn clear_range(
        &mut self,
        index: u64,
        command: &Command,
        begin: Vec<u8>,
        end: Vec<u8>,
    ) -> Result<(), MachineError> {
        if command.direct {
            let db = Arc::clone(&self.db);
            self.stack.push_pending(
                index,
                Pending::new(async move {
                    run_retriable(db.as_ref(), move |tx| {
                        let (begin, end) = (begin.clone(), end.clone());
                        async move {
                            tx.clear_range(&begin, &end);
                            Ok(())
                        }
                        .boxed()
                    })
                    .await?;
                    Ok(StackValue::ResultNotPresent)
                }),
            );
        } else {
            self.current_transaction()?.clear_range(&begin, &end);
        }
        Ok(())
    }

    /// Build the deferred result of a range read, optionally filtered to
    /// keys carrying `filter_prefix`.
    #[expect(clippy::too_many_arguments, reason = "mirrors the wire operation")]
    fn range_pending(
        &mut self,
        command: &Command,
        begin: KeySelector,
        end: KeySelector,
        limit: usize,
        reverse: bool,
        mode: StreamingMode,
        filter_prefix: Option<Vec<u8>>,
    ) -> Result<Pending<StackValue>, MachineError> {
        if command.direct {
            let db = Arc::clone(&self.db);
            Ok(Pending::new(async move {
                let entries = run_retriable(db.as_ref(), move |tx| {
                    let (begin, end) = (begin.clone(), end.clone());
                    async move { tx.get_range(begin, end, limit, reverse, mode, false).await }
                        .boxed()
                })
                .await?;
                Ok(pack_entries(entries, filter_prefix.as_deref()))
            }))
        } else {
            let tx = self.current_transaction()?;
            let snapshot = command.snapshot;
            Ok(Pending::new(async move {
                let entries = tx.get_range(begin, end, limit, reverse, mode, snapshot).await?;
                Ok(pack_entries(entries, filter_prefix.as_deref()))
            }))
        }
    }
}

//---------------------------------------------------------------------------------------------------- Free functions
/// The tuple-packed `("ERROR", decimal_code)` envelope a binding failure
/// turns into at pop time.
pub fn error_envelope(code: i32) -> StackValue {
    StackValue::Bytes(pack(&[
        Element::Bytes(ERROR_TAG.to_vec()),
        Element::Bytes(code.to_string().into_bytes()),
    ]))
}

/// An absent read result becomes the fixed sentinel.
fn option_value(value: Option<Vec<u8>>) -> StackValue {
    match value {
        Some(bytes) => StackValue::Bytes(bytes),
        None => StackValue::ResultNotPresent,
    }
}

/// `GET_KEY` clamps resolved keys into the caller's prefix window.
fn clamp_to_prefix(key: Vec<u8>, prefix: &[u8]) -> Vec<u8> {
    if key.starts_with(prefix) {
        key
    } else if key.as_slice() < prefix {
        prefix.to_vec()
    } else {
        strinc(prefix)
    }
}

/// Row limits arrive as signed integers; zero or less means unlimited.
fn read_limit(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

const fn conflict_kind(opcode: Opcode) -> ConflictRangeType {
    match opcode {
        Opcode::ReadConflictKey | Opcode::ReadConflictRange => ConflictRangeType::Read,
        _ => ConflictRangeType::Write,
    }
}

/// The exclusive end of the single-key range containing `key`.
fn point_end(key: &[u8]) -> Vec<u8> {
    let mut end = key.to_vec();
    end.push(0x00);
    end
}

/// Alternating `key, value` entries packed into one byte string, dropping
/// entries outside `filter_prefix` when one is given.
fn pack_entries(entries: Vec<KeyValue>, filter_prefix: Option<&[u8]>) -> StackValue {
    let mut elements = Vec::with_capacity(entries.len() * 2);
    for (key, value) in entries {
        if let Some(prefix) = filter_prefix {
            if !key.starts_with(prefix) {
                continue;
            }
        }
        elements.push(Element::Bytes(key));
        elements.push(Element::Bytes(value));
    }
    StackValue::Bytes(pack(&elements))
}

//---------------------------------------------------------------------------------------------------- Program loading
/// Read and decode the instruction stream stored under `prefix`.
///
/// Instructions whose tuples do not decode, name unknown opcodes, or carry
/// no `PUSH` literal are logged and omitted; they never halt the run.
pub async fn load_program(db: &dyn Database, prefix: &[u8]) -> Result<Vec<Command>, MachineError> {
    let (begin, end) = child_range(&[Element::Bytes(prefix.to_vec())]);

    let rows = run_retriable(db, move |tx| {
        let (begin, end) = (begin.clone(), end.clone());
        async move {
            tx.get_range(
                KeySelector::first_greater_or_equal(begin),
                KeySelector::first_greater_or_equal(end),
                0,
                false,
                StreamingMode::WantAll,
                false,
            )
            .await
        }
        .boxed()
    })
    .await?;

    let mut commands = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        let instruction = match unpack(&value) {
            Ok(tuple) => tuple,
            Err(error) => {
                warn!(%error, ?key, "skipping undecodable instruction");
                continue;
            }
        };
        match Command::decode(&instruction) {
            Ok(command) => commands.push(command),
            Err(error) => warn!(%error, ?key, "skipping unsupported instruction"),
        }
    }
    Ok(commands)
}

//---------------------------------------------------------------------------------------------------- Spawner
/// Every live machine task. Append-only from the spawning path; the root
/// task drains it at shutdown.
static MACHINES: LazyLock<Mutex<Vec<JoinHandle<()>>>> = LazyLock::new(|| Mutex::new(Vec::new()));

fn lock_machines() -> MutexGuard<'static, Vec<JoinHandle<()>>> {
    match MACHINES.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fork an independent machine rooted at `prefix`.
///
/// The new machine has its own stack, registry and program, re-read from
/// the database at `prefix`; only the database handle is shared. A failure
/// inside it does not cascade to its siblings.
pub fn spawn_machine(db: Arc<dyn Database>, prefix: Vec<u8>) {
    let handle = tokio::spawn(async move {
        let shown = String::from_utf8_lossy(&prefix).into_owned();
        if let Err(error) = run_machine(db, prefix).await {
            error!(%error, prefix = %shown, "stack machine halted");
        }
    });
    lock_machines().push(handle);
}

/// Load the program stored under `prefix` and run it to completion.
pub async fn run_machine(db: Arc<dyn Database>, prefix: Vec<u8>) -> Result<(), MachineError> {
    let commands = load_program(db.as_ref(), &prefix).await?;
    debug!(
        commands = commands.len(),
        prefix = %String::from_utf8_lossy(&prefix),
        "loaded program"
    );
    let mut machine = StackMachine::new(db, prefix)?;
    machine.run(&commands).await
}

/// Wait until every machine, including ones spawned while waiting, is done.
pub async fn join_machines() {
    loop {
        let handles = std::mem::take(&mut *lock_machines());
        if handles.is_empty() {
            return;
        }
        for handle in handles {
            if let Err(error) = handle.await {
                error!(%error, "stack machine task panicked");
            }
        }
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_is_a_packed_pair() {
        let StackValue::Bytes(bytes) = error_envelope(2005) else {
            panic!("envelope must be bytes");
        };
        assert_eq!(
            unpack(&bytes).unwrap(),
            vec![
                Element::Bytes(b"ERROR".to_vec()),
                Element::Bytes(b"2005".to_vec()),
            ]
        );
    }

    #[test]
    fn clamping_resolved_keys() {
        assert_eq!(clamp_to_prefix(b"p1".to_vec(), b"p"), b"p1".to_vec());
        assert_eq!(clamp_to_prefix(b"a".to_vec(), b"p"), b"p".to_vec());
        assert_eq!(clamp_to_prefix(b"z".to_vec(), b"p"), b"q".to_vec());
    }

    #[test]
    fn limits_clamp_to_unlimited() {
        assert_eq!(read_limit(-1), 0);
        assert_eq!(read_limit(0), 0);
        assert_eq!(read_limit(25), 25);
    }

    #[test]
    fn entry_packing_filters_by_prefix() {
        let entries = vec![
            (b"o-a".to_vec(), b"1".to_vec()),
            (b"p-a".to_vec(), b"2".to_vec()),
        ];
        let StackValue::Bytes(bytes) = pack_entries(entries, Some(b"p-")) else {
            panic!("entries must pack to bytes");
        };
        assert_eq!(
            unpack(&bytes).unwrap(),
            vec![
                Element::Bytes(b"p-a".to_vec()),
                Element::Bytes(b"2".to_vec()),
            ]
        );
    }
}
