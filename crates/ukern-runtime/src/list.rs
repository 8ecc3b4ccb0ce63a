//! Intrusive doubly-linked lists over the control-block arena
//!
//! Links live inside the control blocks and refer to each other by slot
//! index, so moving a fiber between queues never allocates. A block carries
//! two independent links (`LinkKind`): one for the scheduler-visible queues
//! and one for membership in another fiber's wait chain.

use ukern_core::SlotId;

/// Which link inside a control block a list threads through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Ready, suspended or global-wait queue
    Scheduler,
    /// Another fiber's `wait_list`
    Wait,
}

/// Per-block link state
#[derive(Debug, Clone, Copy, Default)]
pub struct Link {
    prev: Option<SlotId>,
    next: Option<SlotId>,
    linked: bool,
}

impl Link {
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }
}

/// Storage that can resolve a slot index to one of its links
pub trait LinkArena {
    fn link(&self, idx: SlotId, kind: LinkKind) -> &Link;
    fn link_mut(&mut self, idx: SlotId, kind: LinkKind) -> &mut Link;
}

/// Head of an intrusive list
///
/// `Copy` so that a head stored inside a control block can be taken out,
/// updated against the arena, and written back.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListHead {
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl ListHead {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn front(&self) -> Option<SlotId> {
        self.head
    }

    /// Append `idx` at the tail
    pub fn push_back<A: LinkArena>(&mut self, arena: &mut A, idx: SlotId, kind: LinkKind) {
        debug_assert!(!arena.link(idx, kind).linked, "slot {} already linked", idx);

        let old_tail = self.tail;
        {
            let link = arena.link_mut(idx, kind);
            link.prev = old_tail;
            link.next = None;
            link.linked = true;
        }
        match old_tail {
            Some(t) => arena.link_mut(t, kind).next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Unlink `idx`, which must be on this list
    pub fn remove<A: LinkArena>(&mut self, arena: &mut A, idx: SlotId, kind: LinkKind) {
        let Link { prev, next, linked } = *arena.link(idx, kind);
        debug_assert!(linked, "slot {} not linked", idx);

        match prev {
            Some(p) => arena.link_mut(p, kind).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena.link_mut(n, kind).prev = prev,
            None => self.tail = prev,
        }
        *arena.link_mut(idx, kind) = Link::default();
        self.len -= 1;
    }

    /// Unlink and return the head
    pub fn pop_front<A: LinkArena>(&mut self, arena: &mut A, kind: LinkKind) -> Option<SlotId> {
        let idx = self.head?;
        self.remove(arena, idx, kind);
        Some(idx)
    }

    /// Iterate front to back
    ///
    /// Borrowing the arena immutably, so collect first when the loop body
    /// needs to relink.
    pub fn iter<'a, A: LinkArena>(&self, arena: &'a A, kind: LinkKind) -> ListIter<'a, A> {
        ListIter {
            arena,
            kind,
            cursor: self.head,
        }
    }

    /// Snapshot of the members, front to back
    pub fn to_vec<A: LinkArena>(&self, arena: &A, kind: LinkKind) -> Vec<SlotId> {
        let mut out = Vec::with_capacity(self.len);
        out.extend(self.iter(arena, kind));
        out
    }
}

pub struct ListIter<'a, A> {
    arena: &'a A,
    kind: LinkKind,
    cursor: Option<SlotId>,
}

impl<'a, A: LinkArena> Iterator for ListIter<'a, A> {
    type Item = SlotId;

    fn next(&mut self) -> Option<SlotId> {
        let idx = self.cursor?;
        self.cursor = self.arena.link(idx, self.kind).next;
        Some(idx)
    }
}
