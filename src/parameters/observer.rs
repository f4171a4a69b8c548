//! Priority-ordered change notification
//!
//! An [`ObserverRegistry`] keeps subscriptions sorted by descending priority.
//! Notification walks the list in that order and can be cut off at a minimum
//! priority, so a caller can reach every observer above the lowest tier
//! without triggering the lowest-tier pass-through to a parent.

/// Priority of an observer subscription. Higher priorities are notified first.
pub type Priority = i64;

/// The lowest possible priority. Parents subscribe to their children at this
/// priority so they hear about a change after every other observer.
pub const LOWEST_PRIORITY: Priority = Priority::MIN;

/// A single registration in an [`ObserverRegistry`].
#[derive(Debug, Clone)]
pub struct Subscription<K, C> {
    /// Priority of the subscription
    pub priority: Priority,

    /// Identity of the observer
    pub observer: K,

    /// What to invoke when the observed object changes
    pub callback: C,
}

/// A list of observer subscriptions, kept sorted by descending priority.
///
/// `K` is the observer identity used for unsubscribing, `C` the callback.
#[derive(Debug, Clone)]
pub struct ObserverRegistry<K, C> {
    subscriptions: Vec<Subscription<K, C>>,
}

impl<K, C> Default for ObserverRegistry<K, C> {
    fn default() -> Self {
        Self {
            subscriptions: Vec::new(),
        }
    }
}

impl<K: PartialEq, C> ObserverRegistry<K, C> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `observer` at the given priority.
    ///
    /// A new subscription is placed before any existing subscriptions of
    /// equal priority, so among equals the most recent registration runs first.
    ///
    /// # Examples
    ///
    /// ```
    /// use paramtree_rs::parameters::observer::ObserverRegistry;
    ///
    /// let mut registry: ObserverRegistry<&str, u32> = ObserverRegistry::new();
    /// registry.subscribe("low", 1, -5);
    /// registry.subscribe("high", 2, 10);
    /// let order: Vec<_> = registry.iter().map(|s| s.observer).collect();
    /// assert_eq!(order, vec!["high", "low"]);
    /// ```
    pub fn subscribe(&mut self, observer: K, callback: C, priority: Priority) {
        let position = self
            .subscriptions
            .iter()
            .position(|s| priority >= s.priority)
            .unwrap_or(self.subscriptions.len());
        self.subscriptions.insert(
            position,
            Subscription {
                priority,
                observer,
                callback,
            },
        );
    }

    /// Remove every subscription of `observer`, returning how many were removed.
    pub fn unsubscribe(&mut self, observer: &K) -> usize {
        self.unsubscribe_matching(observer, |_| true)
    }

    /// Remove the subscriptions of `observer` whose callback satisfies `matches`.
    pub fn unsubscribe_matching<F>(&mut self, observer: &K, matches: F) -> usize
    where
        F: Fn(&C) -> bool,
    {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !(s.observer == *observer && matches(&s.callback)));
        before - self.subscriptions.len()
    }

    /// Check whether `observer` holds any subscription
    pub fn is_subscribed(&self, observer: &K) -> bool {
        self.subscriptions.iter().any(|s| s.observer == *observer)
    }
}

impl<K, C> ObserverRegistry<K, C> {
    /// The subscriptions that a notification with `min_priority` reaches.
    ///
    /// With `None` this is every subscription. Otherwise the scan stops at the
    /// first subscription whose priority is `<= min_priority`; because the list
    /// is sorted, everything after it would be excluded as well.
    pub fn active(&self, min_priority: Option<Priority>) -> impl Iterator<Item = &Subscription<K, C>> {
        self.subscriptions
            .iter()
            .take_while(move |s| min_priority.map_or(true, |min| s.priority > min))
    }

    /// Call `dispatch` for every subscription reached by `min_priority`, in order.
    pub fn dispatch<F>(&self, min_priority: Option<Priority>, mut dispatch: F)
    where
        F: FnMut(&Subscription<K, C>),
    {
        for subscription in self.active(min_priority) {
            dispatch(subscription);
        }
    }

    /// Invoke every reached callback with `origin`.
    ///
    /// Callbacks run to completion in priority order; a panic in a callback
    /// propagates to the caller.
    pub fn notify<O: ?Sized>(&self, origin: &O, min_priority: Option<Priority>)
    where
        C: Fn(&O),
    {
        self.dispatch(min_priority, |s| (s.callback)(origin));
    }

    /// Iterate over all subscriptions in notification order
    pub fn iter(&self) -> impl Iterator<Item = &Subscription<K, C>> {
        self.subscriptions.iter()
    }

    /// Number of subscriptions
    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    /// Check whether there are no subscriptions
    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }
}
