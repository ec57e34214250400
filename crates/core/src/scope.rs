//! Scoped context activations and the per-thread nested stack.
//!
//! One thread-local slot holds, per manager type, the head of a singly
//! linked stack of activations. Closing in reverse order pops as a normal
//! stack. Closing out of order marks the node as a tombstone that later
//! head pops skip, so the earliest-opened-but-unclosed activation stays
//! logically underneath until its descendants are gone.

use std::any::TypeId;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::manager::{ContextManager, ManagerKey};
use crate::observer;
use crate::value::AmbientValue;

thread_local! {
    /// Head node per manager type on the current thread. Absence means
    /// "no active context" for that manager.
    static STACKS: RefCell<HashMap<TypeId, Rc<Node>>> = RefCell::new(HashMap::new());
}

struct Node {
    key: ManagerKey,
    value: AmbientValue,
    parent: Option<Rc<Node>>,
    closed: Cell<bool>,
}

/// One active context binding on the thread that created it.
///
/// Closing restores the previously active value for the same manager on
/// the same thread, even when descendants opened later are still active
/// (see the module docs for the out-of-order rule). Close is idempotent
/// and also happens on drop.
///
/// The type is deliberately `!Send`: a scope must be closed by the thread
/// that opened it. The values it carries remain shareable across threads
/// through snapshots.
pub struct ContextScope {
    inner: ScopeImpl,
    detached: Cell<bool>,
}

enum ScopeImpl {
    Stacked(Rc<Node>),
    Custom(CustomScope),
}

struct CustomScope {
    key: ManagerKey,
    value: AmbientValue,
    closed: Cell<bool>,
    restore: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl ContextScope {
    /// A scope whose close runs `restore`, for managers whose state lives
    /// in an external store rather than the shared stack.
    ///
    /// Observers are notified of the activation immediately and of the
    /// deactivation on close; the previous/restored values are reported as
    /// unknown, since only the external store knows them.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn with_restore(
        key: ManagerKey,
        value: AmbientValue,
        restore: impl FnOnce() + 'static,
    ) -> Self {
        observer::notify_activate(key, &value, None);
        Self {
            inner: ScopeImpl::Custom(CustomScope {
                key,
                value,
                closed: Cell::new(false),
                restore: RefCell::new(Some(Box::new(restore))),
            }),
            detached: Cell::new(false),
        }
    }

    /// The manager this scope belongs to.
    #[must_use]
    pub fn key(&self) -> ManagerKey {
        match &self.inner {
            ScopeImpl::Stacked(node) => node.key,
            ScopeImpl::Custom(custom) => custom.key,
        }
    }

    /// The value this scope activated.
    #[must_use]
    pub fn value(&self) -> &AmbientValue {
        match &self.inner {
            ScopeImpl::Stacked(node) => &node.value,
            ScopeImpl::Custom(custom) => &custom.value,
        }
    }

    /// Whether this scope has been closed. Once closed, a scope reports
    /// closed forever.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        match &self.inner {
            ScopeImpl::Stacked(node) => node.closed.get(),
            ScopeImpl::Custom(custom) => custom.closed.get(),
        }
    }

    /// Close this scope, restoring the previously active context for its
    /// manager on this thread. Closing an already-closed scope is a
    /// silent no-op.
    pub fn close(&self) {
        match &self.inner {
            ScopeImpl::Stacked(node) => close_node(node),
            ScopeImpl::Custom(custom) => {
                if custom.closed.replace(true) {
                    return;
                }
                if let Some(restore) = custom.restore.borrow_mut().take() {
                    restore();
                }
                observer::notify_deactivate(custom.key, &custom.value, None);
            }
        }
    }

    /// Consume the scope without closing it, leaving its context active
    /// beyond the handle's lifetime.
    ///
    /// The activation then ends only through a later stack unwind or
    /// [`clear_active_contexts`](crate::snapshot::clear_active_contexts)
    /// on this thread. Chained futures use this to hand a value set inside
    /// one stage to the stages behind it.
    pub fn detach(self) {
        self.detached.set(true);
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        if !self.detached.get() {
            self.close();
        }
    }
}

impl fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextScope")
            .field("manager", &self.key().short_name())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Stack operations for a manager type `M` on the calling thread.
///
/// This is the shared nested-context machine most managers reuse. The
/// stack is keyed by the manager's type, so every instance of `M` (and
/// every thread) sees its own independent chain.
pub struct ScopeStack<M: ContextManager>(PhantomData<fn() -> M>);

impl<M: ContextManager> ScopeStack<M> {
    /// Push `value`, making it the active context for `M` on this thread.
    #[must_use = "dropping the scope immediately closes it again"]
    pub fn push(value: AmbientValue) -> ContextScope {
        push_node(ManagerKey::of::<M>(), value)
    }

    /// The active value for `M` on this thread, if any.
    #[must_use]
    pub fn active() -> Option<AmbientValue> {
        STACKS.with(|stacks| {
            stacks
                .borrow()
                .get(&TypeId::of::<M>())
                .map(|head| AmbientValue::clone(&head.value))
        })
    }

    /// Unconditionally close every activation of `M` on this thread.
    pub fn clear() {
        clear_stack(ManagerKey::of::<M>());
    }
}

fn push_node(key: ManagerKey, value: AmbientValue) -> ContextScope {
    let parent = STACKS.with(|stacks| stacks.borrow().get(&key.type_id()).cloned());
    let previous = parent.as_ref().map(|head| AmbientValue::clone(&head.value));
    let node = Rc::new(Node {
        key,
        value,
        parent,
        closed: Cell::new(false),
    });
    STACKS.with(|stacks| {
        stacks.borrow_mut().insert(key.type_id(), Rc::clone(&node));
    });
    observer::notify_activate(key, &node.value, previous.as_ref());
    ContextScope {
        inner: ScopeImpl::Stacked(node),
        detached: Cell::new(false),
    }
}

fn close_node(node: &Rc<Node>) {
    if node.closed.replace(true) {
        return;
    }
    let type_id = node.key.type_id();
    let is_head = STACKS.with(|stacks| {
        stacks
            .borrow()
            .get(&type_id)
            .is_some_and(|head| Rc::ptr_eq(head, node))
    });
    if !is_head {
        // A descendant is still open: leave the chain alone. This node is
        // now a tombstone that the eventual head unwind skips over, and
        // the active value did not change, so observers are not notified.
        return;
    }
    let mut new_head = node.parent.clone();
    while let Some(candidate) = new_head.take() {
        if !candidate.closed.get() {
            new_head = Some(candidate);
            break;
        }
        new_head = candidate.parent.clone();
    }
    STACKS.with(|stacks| {
        let mut stacks = stacks.borrow_mut();
        match &new_head {
            Some(head) => {
                stacks.insert(type_id, Rc::clone(head));
            }
            None => {
                stacks.remove(&type_id);
            }
        }
    });
    observer::notify_deactivate(
        node.key,
        &node.value,
        new_head.as_ref().map(|head| &head.value),
    );
}

/// Close every node in the chain for `key` on this thread and reset the
/// head, regardless of nesting or tombstones.
pub(crate) fn clear_stack(key: ManagerKey) {
    let head = STACKS.with(|stacks| stacks.borrow_mut().remove(&key.type_id()));
    let Some(head) = head else { return };
    let mut current = Some(Rc::clone(&head));
    while let Some(node) = current {
        node.closed.set(true);
        current = node.parent.clone();
    }
    observer::notify_deactivate(key, &head.value, None);
}
