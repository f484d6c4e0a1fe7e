use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Position of a task within its group, in fork order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u32);

impl TaskId {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A type-safe reference to the result of a forked task.
///
/// A `Handle<T>` is a lightweight, copyable token that stands for the value
/// of type `T` a task will produce. It can be redeemed through
/// [`TaskGroup::result_of`](crate::TaskGroup::result_of) once the group that
/// issued it has joined successfully. Handles remember which group issued
/// them, so redeeming one against another group is rejected.
pub struct Handle<T> {
    pub(crate) group: u64,
    pub(crate) id: TaskId,
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub(crate) fn new(group: u64, id: TaskId) -> Self {
        Self {
            group,
            id,
            _phantom: PhantomData,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.group == other.group && self.id == other.id
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.group.hash(state);
        self.id.hash(state);
    }
}

impl<T> Debug for Handle<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handle")
            .field("group", &self.group)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_is_copy_without_t_copy() {
        let handle: Handle<String> = Handle::new(1, TaskId(3));
        let copy = handle;
        assert_eq!(handle, copy);
        assert_eq!(copy.id().index(), 3);
        assert_eq!(copy.id().to_string(), "#3");
    }

    #[test]
    fn test_handle_traits_without_t_bounds() {
        struct Opaque;

        let a: Handle<Opaque> = Handle::new(1, TaskId(0));
        let b: Handle<Opaque> = Handle::new(1, TaskId(1));
        let other_group: Handle<Opaque> = Handle::new(2, TaskId(0));

        assert_eq!(a, a);
        assert_ne!(a, b);
        assert_ne!(a, other_group);
        assert_eq!(format!("{a:?}"), "Handle { group: 1, id: TaskId(0) }");

        let set: std::collections::HashSet<_> = [a, b, a].into_iter().collect();
        assert_eq!(set.len(), 2);
    }
}
