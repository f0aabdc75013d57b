//! Subscriber registry and the deferred-dispatch queue handed to listeners.

use std::collections::VecDeque;

use serde::Serialize;

use crate::{
    actions::{Action, BuilderAction},
    model::DocumentState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, PartialEq, Serialize)]
/// Broadcast to change observers after every committed dispatch.
pub struct StateChangeEvent {
    pub state: DocumentState,
    pub timestamp: u64,
}

/// Actions requested by a listener while a notification is in progress.
///
/// They are dispatched in request order once every listener has seen the current state.
#[derive(Debug, Default)]
pub struct DeferredDispatch {
    queue: VecDeque<Action>,
}

impl DeferredDispatch {
    pub fn dispatch(&mut self, body: BuilderAction) {
        self.queue.push_back(Action::new(body));
    }

    pub fn dispatch_action(&mut self, action: Action) {
        self.queue.push_back(action);
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub(crate) fn drain(&mut self) -> impl Iterator<Item = Action> + '_ {
        self.queue.drain(..)
    }
}

pub type Listener = Box<dyn FnMut(&DocumentState, &mut DeferredDispatch)>;
pub type ChangeObserver = Box<dyn FnMut(&StateChangeEvent)>;

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener)>,
    observers: Vec<(SubscriptionId, ChangeObserver)>,
}

impl Listeners {
    fn allocate(&mut self) -> SubscriptionId {
        self.next_id += 1;
        SubscriptionId(self.next_id)
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        let id = self.allocate();
        self.listeners.push((id, listener));
        id
    }

    pub fn observe(&mut self, observer: ChangeObserver) -> SubscriptionId {
        let id = self.allocate();
        self.observers.push((id, observer));
        id
    }

    /// Removes a listener or observer. Returns `false` when the id is unknown.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len() + self.observers.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.observers.retain(|(existing, _)| *existing != id);
        before != self.listeners.len() + self.observers.len()
    }

    pub fn len(&self) -> usize {
        self.listeners.len() + self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls one listener, e.g. right after it subscribes.
    pub fn notify_one(&mut self, id: SubscriptionId, state: &DocumentState, deferred: &mut DeferredDispatch) {
        if let Some((_, listener)) = self.listeners.iter_mut().find(|(existing, _)| *existing == id) {
            listener(state, deferred);
        }
    }

    /// Calls every listener with `state`, then every observer with a change event.
    pub fn notify(&mut self, state: &DocumentState, timestamp: u64, deferred: &mut DeferredDispatch) {
        for (_, listener) in &mut self.listeners {
            listener(state, deferred);
        }
        if self.observers.is_empty() {
            return;
        }
        let event = StateChangeEvent {
            state: state.clone(),
            timestamp,
        };
        for (_, observer) in &mut self.observers {
            observer(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn listeners_and_observers_receive_state_in_subscription_order() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::default();
        let first = Rc::clone(&calls);
        listeners.subscribe(Box::new(move |state, _| first.borrow_mut().push(format!("l1:{}", state.theme))));
        let second = Rc::clone(&calls);
        listeners.observe(Box::new(move |event| second.borrow_mut().push(format!("o:{}", event.timestamp))));
        let third = Rc::clone(&calls);
        listeners.subscribe(Box::new(move |_, _| third.borrow_mut().push("l2".to_string())));

        let mut deferred = DeferredDispatch::default();
        listeners.notify(&DocumentState::default(), 9, &mut deferred);

        assert_eq!(*calls.borrow(), vec!["l1:default", "l2", "o:9"]);
    }

    #[test]
    fn unsubscribe_removes_only_the_given_subscription() {
        let mut listeners = Listeners::default();
        let a = listeners.subscribe(Box::new(|_, _| {}));
        let b = listeners.observe(Box::new(|_| {}));
        assert!(listeners.unsubscribe(a));
        assert!(!listeners.unsubscribe(a));
        assert_eq!(listeners.len(), 1);
        assert!(listeners.unsubscribe(b));
        assert!(listeners.is_empty());
    }

    #[test]
    fn listeners_queue_follow_up_actions() {
        let mut listeners = Listeners::default();
        listeners.subscribe(Box::new(|state, deferred| {
            if state.theme == "default" {
                deferred.dispatch(BuilderAction::SetTheme {
                    theme: "dark".to_string(),
                });
            }
        }));
        let mut deferred = DeferredDispatch::default();
        listeners.notify(&DocumentState::default(), 1, &mut deferred);
        let queued = deferred.drain().map(|action| action.body).collect::<Vec<_>>();
        assert_eq!(
            queued,
            vec![BuilderAction::SetTheme {
                theme: "dark".to_string()
            }]
        );
    }
}
