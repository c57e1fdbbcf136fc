use std::any::type_name;
use std::thread;

/// What a container does with items it still holds when it is dropped.
///
/// # Examples
///
/// ```
/// use alloc_kit::SystemAllocator;
/// use handle_arrays::{BucketArray, DropPolicy};
///
/// let system = SystemAllocator::new();
/// let mut array = BucketArray::<u32>::builder(&system)
///     .drop_policy(DropPolicy::MustNotDropItems)
///     .build();
///
/// let handle = array.insert(42);
///
/// // The array must be emptied before it goes out of scope.
/// array.remove(handle);
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// Remaining items are dropped together with the container.
    #[default]
    MayDropItems,

    /// Dropping a container that still holds items panics.
    ///
    /// Useful when items hold resources that need an explicit release step, or when other
    /// structures keep handles into the container and must be cleaned up first.
    MustNotDropItems,
}

impl DropPolicy {
    /// Enforces the policy for a container of `T` that is being dropped.
    ///
    /// Does nothing while the thread is already panicking, so the original panic is not obscured.
    pub(crate) fn enforce<T>(self, container: &str, was_empty: bool) {
        if self == Self::MustNotDropItems && !thread::panicking() {
            assert!(
                was_empty,
                "dropped a non-empty {container} of {} with a policy that says it must be empty when dropped",
                type_name::<T>()
            );
        }
    }
}
