use crate::id::ItemTypeId;
use serde::{Deserialize, Serialize};

/// Number of buffer slots inside a splitter.
pub const MAX_INVENTORY_SIZE: usize = 10;

/// A single discrete item travelling through the factory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub item_type: ItemTypeId,
}

impl Item {
    pub fn new(item_type: ItemTypeId) -> Self {
        Self { item_type }
    }
}

/// Fixed-size slot buffer holding the items a splitter has pulled from its
/// input but not yet handed to an output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemBuffer {
    slots: [Option<Item>; MAX_INVENTORY_SIZE],
}

impl ItemBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put an item into the first free slot. Hands the item back if full.
    pub fn insert(&mut self, item: Item) -> Result<usize, Item> {
        match self.slots.iter().position(Option::is_none) {
            Some(slot) => {
                self.slots[slot] = Some(item);
                Ok(slot)
            }
            None => Err(item),
        }
    }

    /// Whether the slot currently holds an item.
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(Option::is_some)
    }

    /// Take the item out of a slot.
    pub fn take(&mut self, slot: usize) -> Option<Item> {
        self.slots.get_mut(slot).and_then(Option::take)
    }

    /// Indices of all occupied slots, in slot order.
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
    }

    /// Number of items currently buffered.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() == MAX_INVENTORY_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ore() -> Item {
        Item::new(ItemTypeId(1))
    }

    #[test]
    fn insert_fills_first_free_slot() {
        let mut buffer = ItemBuffer::new();
        assert_eq!(buffer.insert(ore()), Ok(0));
        assert_eq!(buffer.insert(ore()), Ok(1));
        assert_eq!(buffer.take(0), Some(ore()));
        assert_eq!(buffer.insert(ore()), Ok(0));
    }

    #[test]
    fn full_buffer_rejects_item() {
        let mut buffer = ItemBuffer::new();
        for _ in 0..MAX_INVENTORY_SIZE {
            assert!(buffer.insert(ore()).is_ok());
        }
        assert!(buffer.is_full());
        assert_eq!(buffer.insert(ore()), Err(ore()));
    }

    #[test]
    fn occupied_slots_skips_holes() {
        let mut buffer = ItemBuffer::new();
        for _ in 0..4 {
            buffer.insert(ore()).unwrap();
        }
        buffer.take(1);
        let slots: Vec<usize> = buffer.occupied_slots().collect();
        assert_eq!(slots, vec![0, 2, 3]);
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn take_out_of_range_is_none() {
        let mut buffer = ItemBuffer::new();
        assert_eq!(buffer.take(MAX_INVENTORY_SIZE), None);
        assert!(!buffer.is_occupied(MAX_INVENTORY_SIZE + 3));
    }
}
