use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

new_key_type! {
    /// Identifies a splitter in a [`SplitterNetwork`](crate::network::SplitterNetwork).
    pub struct SplitterId;

    /// Identifies a conveyor belt in a [`BeltTopology`](crate::topology::BeltTopology).
    pub struct BeltId;

    /// Identifies a non-splitter building (producer or consumer).
    pub struct MachineId;
}

/// Identifies an item type. Cheap to copy and compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemTypeId(pub u32);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn item_type_id_equality() {
        assert_eq!(ItemTypeId(0), ItemTypeId(0));
        assert_ne!(ItemTypeId(0), ItemTypeId(1));
    }

    #[test]
    fn splitter_ids_are_distinct_keys() {
        let mut sm: SlotMap<SplitterId, ()> = SlotMap::with_key();
        let a = sm.insert(());
        let b = sm.insert(());
        assert_ne!(a, b);
        sm.remove(a);
        assert!(!sm.contains_key(a));
        assert!(sm.contains_key(b));
    }
}
