//! The deferred stack; `struct Stack`.

//---------------------------------------------------------------------------------------------------- Import
use crate::{error::MachineError, pending::Pending, value::StackValue};

//---------------------------------------------------------------------------------------------------- StackItem
/// One slot: a deferred value tagged with the instruction that produced it.
#[derive(Debug, Clone)]
pub struct StackItem {
    pub pending: Pending<StackValue>,
    /// The command counter at the moment this slot was created; part of the
    /// key `LOG_STACK` persists the slot under.
    pub producer_index: u64,
}

//---------------------------------------------------------------------------------------------------- Stack
/// An ordered sequence of deferred slots, newest at the tail.
#[derive(Debug, Default)]
pub struct Stack {
    items: Vec<StackItem>,
}

impl Stack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Push an already-resolved value.
    pub fn push(&mut self, producer_index: u64, value: StackValue) {
        self.push_pending(producer_index, Pending::ready(value));
    }

    /// Push a deferred slot.
    pub fn push_pending(&mut self, producer_index: u64, pending: Pending<StackValue>) {
        self.items.push(StackItem {
            pending,
            producer_index,
        });
    }

    /// Push back a previously popped slot, producer tag and all.
    pub fn push_item(&mut self, item: StackItem) {
        self.items.push(item);
    }

    /// Remove and return the tail slot's deferred value.
    ///
    /// An empty stack yields an immediately-failed pending; whether that
    /// failure matters is up to whoever resolves it.
    pub fn pop(&mut self) -> Pending<StackValue> {
        match self.items.pop() {
            Some(item) => item.pending,
            None => Pending::failed(MachineError::PoppedEmptyStack),
        }
    }

    /// Remove and return the whole tail slot.
    pub fn pop_item(&mut self) -> Option<StackItem> {
        self.items.pop()
    }

    /// Duplicate the tail slot. The two slots share one pending identity,
    /// so resolving either materialises the same value for both.
    pub fn dup(&mut self) -> Result<(), MachineError> {
        let Some(tail) = self.items.last() else {
            return Err(MachineError::PoppedEmptyStack);
        };
        let copy = tail.clone();
        self.items.push(copy);
        Ok(())
    }

    /// Swap the tail slot with the slot `distance` below it.
    pub fn swap(&mut self, distance: usize) -> Result<(), MachineError> {
        let len = self.items.len();
        if distance >= len {
            return Err(MachineError::SwappedBeyondBounds { distance, len });
        }
        self.items.swap(len - 1, len - 1 - distance);
        Ok(())
    }

    /// Discard every slot.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Remove and return every slot, bottom first.
    pub fn take_items(&mut self) -> Vec<StackItem> {
        std::mem::take(&mut self.items)
    }
}

//---------------------------------------------------------------------------------------------------- Tests
#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_pop_is_lifo() {
        let mut stack = Stack::new();
        stack.push(0, StackValue::Int(1));
        stack.push(1, StackValue::Int(2));

        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(2));
        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(1));
        assert!(stack.is_empty());
    }

    #[tokio::test]
    async fn pop_on_empty_fails_lazily() {
        let mut stack = Stack::new();
        let pending = stack.pop();
        assert_eq!(
            pending.resolve().await,
            Err(MachineError::PoppedEmptyStack)
        );
    }

    #[tokio::test]
    async fn dup_shares_identity() {
        let mut stack = Stack::new();
        stack.push_pending(3, Pending::new(async { Ok(StackValue::Int(9)) }));
        stack.dup().unwrap();

        assert_eq!(stack.len(), 2);
        let a = stack.pop().resolve().await.unwrap();
        let b = stack.pop().resolve().await.unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn dup_on_empty_is_an_error() {
        assert_eq!(Stack::new().dup(), Err(MachineError::PoppedEmptyStack));
    }

    #[tokio::test]
    async fn swap_by_distance() {
        let mut stack = Stack::new();
        for i in 0..4 {
            stack.push(i, StackValue::Int(i as i64));
        }

        // Swap the tail with the slot two below it: 0 1 2 3 -> 0 3 2 1.
        stack.swap(2).unwrap();
        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(1));
        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(2));
        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(3));
        assert_eq!(stack.pop().resolve().await.unwrap(), StackValue::Int(0));
    }

    #[test]
    fn swap_beyond_bounds() {
        let mut stack = Stack::new();
        stack.push(0, StackValue::Int(0));
        assert_eq!(
            stack.swap(1),
            Err(MachineError::SwappedBeyondBounds {
                distance: 1,
                len: 1
            })
        );
    }

    #[test]
    fn producer_index_is_preserved() {
        let mut stack = Stack::new();
        stack.push(7, StackValue::Int(0));
        let item = stack.pop_item().unwrap();
        assert_eq!(item.producer_index, 7);
        stack.push_item(item);
        assert_eq!(stack.pop_item().unwrap().producer_index, 7);
    }
}
