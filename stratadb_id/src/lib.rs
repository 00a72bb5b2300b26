//! Typed identifiers for the catalog, and the allocator that mints them.
//!
//! Every object tracked by the catalog is addressed by a process-unique
//! 64 bit identifier. Each identifier kind is a distinct new-type so that,
//! for example, a namespace id can never be confused with a column id, and
//! each kind draws from its own monotonic counter in the [`IdAllocator`].

mod serialize;

pub use serialize::SerdeVecMap;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

/// Common behavior of all typed catalog identifiers.
///
/// Identifiers are never reused, never recycled across delete/recreate, and
/// never compared across kinds.
pub trait CatalogId:
    Copy
    + Clone
    + fmt::Debug
    + fmt::Display
    + PartialEq
    + Eq
    + PartialOrd
    + Ord
    + core::hash::Hash
    + Default
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Wraps a raw value previously produced by [`CatalogId::get`].
    fn new(raw: u64) -> Self;

    /// The raw 64 bit value.
    fn get(&self) -> u64;
}

macro_rules! typed_id {
    ($(#[$docs:meta])* $name:ident) => {
        $(#[$docs])*
        #[derive(
            Debug,
            Copy,
            Clone,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            Default,
            Serialize,
            Deserialize,
        )]
        pub struct $name(u64);

        impl CatalogId for $name {
            fn new(raw: u64) -> Self {
                Self(raw)
            }

            fn get(&self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

typed_id!(
    /// Identifier of a namespace.
    NamespaceId
);
typed_id!(
    /// Identifier of a logical entity (table, collection, or graph).
    EntityId
);
typed_id!(
    /// Identifier of a logical column or field.
    FieldId
);
typed_id!(
    /// Identifier of a constraint.
    ConstraintId
);
typed_id!(
    /// Identifier of an allocation placement (entity on adapter).
    PlacementId
);
typed_id!(
    /// Identifier of an allocation partition (partition on adapter).
    AllocationId
);
typed_id!(
    /// Identifier of a partition.
    PartitionId
);
typed_id!(
    /// Identifier of a partition group.
    PartitionGroupId
);
typed_id!(
    /// Identifier of a registered adapter instance.
    AdapterId
);
typed_id!(
    /// Identifier of a user.
    UserId
);
typed_id!(
    /// Identifier of a query interface.
    InterfaceId
);
typed_id!(
    /// Identifier of a physical entity registered by an adapter.
    PhysicalId
);

macro_rules! id_allocator {
    ($($field:ident: $id:ty => $next_fn:ident, $observe_fn:ident;)+) => {
        /// Hands out process-unique identifiers, one monotonic counter per
        /// kind.
        ///
        /// The catalog owns exactly one allocator and passes it by reference
        /// wherever ids are minted; no component creates an identifier any
        /// other way. Counters restore from [`IdAllocatorState`] at bootstrap
        /// so a restarted process never reissues a previously persisted id.
        #[derive(Debug, Default)]
        pub struct IdAllocator {
            $($field: AtomicU64,)+
        }

        /// Persisted high-water marks of every counter.
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
        pub struct IdAllocatorState {
            $(pub $field: u64,)+
        }

        impl IdAllocator {
            /// Restores every counter from its persisted high-water mark.
            pub fn from_state(state: &IdAllocatorState) -> Self {
                Self {
                    $($field: AtomicU64::new(state.$field),)+
                }
            }

            /// High-water marks of all counters, for persistence.
            pub fn state(&self) -> IdAllocatorState {
                IdAllocatorState {
                    $($field: self.$field.load(Ordering::SeqCst),)+
                }
            }

            $(
            /// Mints the next identifier of this kind.
            pub fn $next_fn(&self) -> $id {
                self.$field
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_add(1))
                    .map(<$id>::new)
                    .expect("id counter overflow")
            }

            /// Advances the counter past `id` unless it is already there.
            /// Applied while replaying logged operations so counters heal
            /// from any skew between a checkpoint and later log files.
            pub fn $observe_fn(&self, id: $id) {
                self.$field
                    .fetch_max(id.get().saturating_add(1), Ordering::SeqCst);
            }
            )+
        }
    };
}

id_allocator! {
    namespace: NamespaceId => next_namespace_id, observe_namespace_id;
    entity: EntityId => next_entity_id, observe_entity_id;
    field: FieldId => next_field_id, observe_field_id;
    constraint: ConstraintId => next_constraint_id, observe_constraint_id;
    placement: PlacementId => next_placement_id, observe_placement_id;
    allocation: AllocationId => next_allocation_id, observe_allocation_id;
    partition: PartitionId => next_partition_id, observe_partition_id;
    partition_group: PartitionGroupId => next_partition_group_id, observe_partition_group_id;
    adapter: AdapterId => next_adapter_id, observe_adapter_id;
    user: UserId => next_user_id, observe_user_id;
    interface: InterfaceId => next_interface_id, observe_interface_id;
    physical: PhysicalId => next_physical_id, observe_physical_id;
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashSet;
    use std::sync::Arc;

    use proptest::prelude::*;

    #[test]
    fn ids_are_monotonic_per_kind() {
        let ids = IdAllocator::default();
        assert_eq!(ids.next_entity_id(), EntityId::new(0));
        assert_eq!(ids.next_entity_id(), EntityId::new(1));
        // other kinds do not share the counter:
        assert_eq!(ids.next_namespace_id(), NamespaceId::new(0));
        assert_eq!(ids.next_entity_id(), EntityId::new(2));
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let ids = Arc::new(IdAllocator::default());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || {
                    (0..1_000).map(|_| ids.next_field_id()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {id} was issued twice");
            }
        }
        assert_eq!(seen.len(), 8_000);
    }

    #[test]
    fn state_round_trip_restores_counters() {
        let ids = IdAllocator::default();
        for _ in 0..5 {
            ids.next_adapter_id();
        }
        ids.next_namespace_id();

        let state = ids.state();
        let restored = IdAllocator::from_state(&state);
        assert_eq!(restored.next_adapter_id(), AdapterId::new(5));
        assert_eq!(restored.next_namespace_id(), NamespaceId::new(1));
        assert_eq!(restored.next_entity_id(), EntityId::new(0));
    }

    #[test]
    fn observe_advances_but_never_regresses() {
        let ids = IdAllocator::default();
        ids.observe_partition_id(PartitionId::new(41));
        assert_eq!(ids.next_partition_id(), PartitionId::new(42));
        // observing an older id must not move the counter back
        ids.observe_partition_id(PartitionId::new(3));
        assert_eq!(ids.next_partition_id(), PartitionId::new(43));
    }

    #[test]
    fn serde_as_plain_integer() {
        let id = EntityId::new(7);
        assert_eq!(serde_json::to_string(&id).unwrap(), "7");
        let back: EntityId = serde_json::from_str("7").unwrap();
        assert_eq!(back, id);
    }

    proptest! {
        #[test]
        fn allocations_strictly_increase(n in 1usize..512) {
            let ids = IdAllocator::default();
            let mut prev: Option<EntityId> = None;
            for _ in 0..n {
                let id = ids.next_entity_id();
                if let Some(prev) = prev {
                    prop_assert!(id > prev);
                }
                prev = Some(id);
            }
        }
    }
}
