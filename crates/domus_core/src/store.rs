//! The store
//!
//! [`Store`] is the entry point: it resolves domains, answers queries, runs
//! command batches and manages subscriptions. It is a cheap handle around a
//! shared runtime guarded by a single mutex, plus a batch mutex serializing
//! every send/emit together with its settle.
//!
//! Calls to [`Store::send`] or [`Store::emit_event`] made from a listener or
//! inspector running inside a batch on the same thread do not nest: they are
//! queued and run as independent batches before the outer call returns.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError, Weak};
use std::thread::{self, ThreadId};

use crate::capability::ExternImpl;
use crate::command::{Command, CommandId, EventEmission};
use crate::config::StoreConfig;
use crate::domain::DomainDef;
use crate::error::{Result, StoreError};
use crate::event::Event;
use crate::inspector::{Inspector, InspectorRecord};
use crate::key::{ArgKey, Argument};
use crate::query::Query;
use crate::runtime::{Batch, EventCallback, QueryCallback, Runtime, Target};
use crate::value::{value_as, Data, SharedData, Value};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A unit of work waiting for the batch lock
enum Pending {
    Command { id: CommandId, input: SharedData },
    Event(EventEmission),
}

struct Shared {
    name: String,
    runtime: Mutex<Runtime>,
    inspectors: Vec<Arc<dyn Inspector>>,
    /// Held for the whole of a batch, settle and delivery included
    batch: Mutex<()>,
    /// Thread currently running a batch, if any
    dispatcher: Mutex<Option<ThreadId>>,
    queue: Mutex<VecDeque<Pending>>,
    /// Releases that arrived while the runtime was locked
    releases: Mutex<Vec<Target>>,
    destroyed: AtomicBool,
}

impl Shared {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn lock_runtime(&self) -> Result<MutexGuard<'_, Runtime>> {
        if self.is_destroyed() {
            return Err(StoreError::Destroyed);
        }
        let mut runtime = lock(&self.runtime);
        let releases = std::mem::take(&mut *lock(&self.releases));
        for target in releases {
            runtime.release(target);
        }
        Ok(runtime)
    }

    fn inspect(&self, records: Vec<InspectorRecord>) {
        for record in records.iter() {
            for inspector in self.inspectors.iter() {
                inspector.inspect(record);
            }
        }
    }

    fn release(&self, target: Target) {
        if self.is_destroyed() {
            return;
        }
        let mut runtime = match self.runtime.try_lock() {
            Ok(runtime) => runtime,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => {
                lock(&self.releases).push(target);
                return;
            }
        };
        runtime.release(target);
        let records = runtime.take_records();
        drop(runtime);
        self.inspect(records);
    }
}

/// Marks the current thread as the dispatcher until dropped
struct DispatchGuard<'a> {
    shared: &'a Shared,
}

impl<'a> DispatchGuard<'a> {
    fn enter(shared: &'a Shared, thread: ThreadId) -> Self {
        *lock(&shared.dispatcher) = Some(thread);
        Self { shared }
    }
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        *lock(&self.shared.dispatcher) = None;
    }
}

/// Builder for [`Store`]
#[derive(Default)]
pub struct StoreBuilder {
    config: StoreConfig,
    inspectors: Vec<Arc<dyn Inspector>>,
    externs: Vec<ExternImpl>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_command_depth(mut self, depth: usize) -> Self {
        self.config.max_command_depth = depth;
        self
    }

    /// Add an inspector hook; hooks run in the order they were added
    pub fn inspector(mut self, inspector: impl Inspector + 'static) -> Self {
        self.inspectors.push(Arc::new(inspector));
        self
    }

    /// Override the default of an external capability
    pub fn provide(mut self, implementation: ExternImpl) -> Self {
        self.externs.push(implementation);
        self
    }

    pub fn build(self) -> Store {
        let mut runtime = Runtime::new(self.config.clone(), !self.inspectors.is_empty());
        for implementation in self.externs {
            runtime.externs.insert(implementation.key, implementation.value);
        }
        tracing::debug!(
            store = %self.config.name,
            inspectors = self.inspectors.len(),
            externs = runtime.externs.len(),
            "store created"
        );

        Store {
            shared: Arc::new(Shared {
                name: self.config.name,
                runtime: Mutex::new(runtime),
                inspectors: self.inspectors,
                batch: Mutex::new(()),
                dispatcher: Mutex::new(None),
                queue: Mutex::new(VecDeque::new()),
                releases: Mutex::new(Vec::new()),
                destroyed: AtomicBool::new(false),
            }),
        }
    }
}

/// Handle to a running store
#[derive(Clone)]
pub struct Store {
    shared: Arc<Shared>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.shared.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Store {
    /// A store with default configuration and no hooks
    pub fn new() -> Self {
        StoreBuilder::new().build()
    }

    pub fn builder() -> StoreBuilder {
        StoreBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.is_destroyed()
    }

    /// Number of live domain instances
    pub fn domain_count(&self) -> usize {
        lock(&self.shared.runtime).domains.len()
    }

    fn with_runtime<R>(&self, f: impl FnOnce(&mut Runtime) -> Result<R>) -> Result<R> {
        let mut runtime = self.shared.lock_runtime()?;
        let result = f(&mut runtime);
        let records = runtime.take_records();
        drop(runtime);
        self.shared.inspect(records);
        result
    }

    /// Resolve the instance of `def` for `arg`, building it on first use.
    ///
    /// An instance resolved here is pinned: releasing subscriptions never
    /// tears it down, only [`Store::destroy`] does. Use
    /// [`Store::subscribe_domain`] for instances that should go away with
    /// their last consumer.
    pub fn get_domain<A, O>(&self, def: &DomainDef<A, O>, arg: A) -> Result<O>
    where
        A: Argument,
        O: Clone + Send + Sync + 'static,
    {
        self.with_runtime(|runtime| {
            let (id, output) = runtime.get_domain(def, arg)?;
            runtime.pin_domain(id);
            Ok(output)
        })
    }

    /// Read the up-to-date value of a query instance.
    ///
    /// The instance stays cached while its domain lives; only instances
    /// released by their last subscription are collected.
    pub fn query<A: Argument, T: Clone + 'static>(&self, query: Query<A, T>, arg: A) -> Result<T> {
        self.with_runtime(|runtime| {
            let read = runtime.read_query(query.id(), ArgKey::new(arg))?;
            value_as::<T>(&*read.value, &read.key)
        })
    }

    /// Call `observer` with the new value every time the query instance
    /// changes. The instance is evaluated immediately; the current value is
    /// not delivered.
    pub fn subscribe_query<A, T, F>(&self, query: Query<A, T>, arg: A, observer: F) -> Result<Subscription>
    where
        A: Argument,
        T: Clone + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let callback: Arc<QueryCallback> = Arc::new(move |value: &dyn Value| {
            if let Some(value) = value.as_any().downcast_ref::<T>() {
                observer(value);
            }
        });
        let (target, active) =
            self.with_runtime(|runtime| runtime.subscribe_query(query.id(), ArgKey::new(arg), callback))?;
        Ok(self.subscription(target, active))
    }

    /// Call `handler` with every payload emitted on `event`
    pub fn subscribe_event<P, F>(&self, event: Event<P>, handler: F) -> Result<Subscription>
    where
        P: 'static,
        F: Fn(&P) + Send + Sync + 'static,
    {
        let callback: Arc<EventCallback> = Arc::new(move |payload: &dyn Data| {
            if let Some(payload) = payload.as_any().downcast_ref::<P>() {
                handler(payload);
            }
        });
        let (target, active) = self.with_runtime(|runtime| runtime.subscribe_event(event.id(), callback))?;
        Ok(self.subscription(target, active))
    }

    /// Keep the instance of `def` for `arg` alive for the lifetime of the
    /// returned subscription
    pub fn subscribe_domain<A, O>(&self, def: &DomainDef<A, O>, arg: A) -> Result<(O, Subscription)>
    where
        A: Argument,
        O: Clone + Send + Sync + 'static,
    {
        let (id, output) = self.with_runtime(|runtime| {
            let (id, output) = runtime.get_domain(def, arg)?;
            runtime.retain_domain(id);
            Ok((id, output))
        })?;
        let subscription = self.subscription(Target::Domain(id), Arc::new(AtomicBool::new(true)));
        Ok((output, subscription))
    }

    fn subscription(&self, target: Target, active: Arc<AtomicBool>) -> Subscription {
        Subscription {
            shared: Arc::downgrade(&self.shared),
            target: Some(target),
            active,
        }
    }

    /// Run a command as one batch and settle it
    pub fn send<I: Data + Clone>(&self, command: Command<I>, input: I) -> Result<()> {
        self.dispatch(Pending::Command {
            id: command.id(),
            input: Arc::new(input),
        })
    }

    /// Emit an event from outside any command
    pub fn emit_event<P: Data>(&self, event: Event<P>, payload: P) -> Result<()> {
        self.dispatch(Pending::Event(EventEmission::new(event.id(), Arc::new(payload))))
    }

    fn dispatch(&self, pending: Pending) -> Result<()> {
        if self.is_destroyed() {
            return Err(StoreError::Destroyed);
        }

        let current = thread::current().id();
        if *lock(&self.shared.dispatcher) == Some(current) {
            lock(&self.shared.queue).push_back(pending);
            return Ok(());
        }

        let _batch = lock(&self.shared.batch);
        let _guard = DispatchGuard::enter(&self.shared, current);
        let mut result = self.run_batch(pending);

        loop {
            let next = lock(&self.shared.queue).pop_front();
            let Some(next) = next else {
                break;
            };
            if let Err(err) = self.run_batch(next) {
                if result.is_ok() {
                    result = Err(err);
                } else {
                    tracing::error!(store = %self.shared.name, error = %err, "queued batch failed");
                }
            }
        }
        result
    }

    fn run_batch(&self, pending: Pending) -> Result<()> {
        let mut runtime = self.shared.lock_runtime()?;
        let mut batch = Batch::default();
        let applied = match pending {
            Pending::Command { id, input } => runtime.run_command(id, input, &mut batch, 0),
            Pending::Event(emission) => {
                if runtime.events.contains_key(emission.event) {
                    batch.events.push(emission);
                    Ok(())
                } else {
                    Err(StoreError::unknown(format!("{:?}", emission.event)))
                }
            }
        };
        if let Err(err) = &applied {
            tracing::debug!(store = %self.shared.name, error = %err, "batch failed, settling applied effects");
        }

        let (notifications, settled) = runtime.settle(batch);
        let records = runtime.take_records();
        drop(runtime);

        self.shared.inspect(records);
        for notification in notifications {
            notification.deliver();
        }
        applied.and(settled)
    }

    /// Tear down every domain and refuse further operations
    pub fn destroy(&self) {
        let mut runtime = lock(&self.shared.runtime);
        if self.shared.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        runtime.destroy();
        let records = runtime.take_records();
        runtime.stop_inspecting();
        drop(runtime);

        self.shared.inspect(records);
        lock(&self.shared.queue).clear();
        lock(&self.shared.releases).clear();
        tracing::debug!(store = %self.shared.name, "store destroyed");
    }
}

/// Keeps a query, event or domain subscription alive.
///
/// Dropping it (or calling [`Subscription::unsubscribe`]) cancels the
/// subscription immediately: no further callbacks are made.
#[must_use = "dropping a subscription cancels it"]
pub struct Subscription {
    shared: Weak<Shared>,
    target: Option<Target>,
    active: Arc<AtomicBool>,
}

impl Subscription {
    /// False once cancelled or once the subscribed entity was torn down
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(self) {}
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.target)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.active.store(false, Ordering::Release);
        let Some(target) = self.target.take() else {
            return;
        };
        if let Some(shared) = self.shared.upgrade() {
            shared.release(target);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::State;

    fn counter() -> DomainDef<(), (State<i32>, Query<(), i32>, Command<i32>)> {
        DomainDef::new("Counter", |d, _: &()| {
            let count = d.state("Count", 0i32);
            let value = d.query("Value", move |ctx, _: &()| ctx.get(count));
            let add = d.command("Add", move |ctx, by: i32| Ok(vec![count.set(ctx.get(count)? + by)]));
            Ok((count, value, add))
        })
    }

    #[test]
    fn test_builder_settings() {
        let store = Store::builder().name("app").max_command_depth(3).build();
        assert_eq!(store.name(), "app");
        assert_eq!(lock(&store.shared.runtime).config.max_command_depth, 3);
    }

    #[test]
    fn test_destroyed_store_rejects_operations() {
        let store = Store::new();
        let (_, value, add) = store.get_domain(&counter(), ()).unwrap();
        store.destroy();
        assert!(store.is_destroyed());
        assert!(matches!(store.send(add, 1), Err(StoreError::Destroyed)));
        assert!(matches!(store.query(value, ()), Err(StoreError::Destroyed)));
        assert_eq!(store.domain_count(), 0);
    }

    #[test]
    fn test_release_while_locked_is_deferred() {
        let store = Store::new();
        let (output, subscription) = store.subscribe_domain(&counter(), ()).unwrap();
        assert_eq!(store.domain_count(), 1);

        let guard = lock(&store.shared.runtime);
        drop(subscription);
        assert_eq!(lock(&store.shared.releases).len(), 1);
        drop(guard);

        // the next operation drains the pending release
        assert!(matches!(store.query(output.1, ()), Err(StoreError::UnknownKey(_))));
        assert_eq!(store.domain_count(), 0);
    }

    #[test]
    fn test_destroy_deactivates_subscriptions() {
        let store = Store::new();
        let (_, value, _) = store.get_domain(&counter(), ()).unwrap();
        let subscription = store.subscribe_query(value, (), |_| {}).unwrap();
        assert!(subscription.is_active());
        store.destroy();
        assert!(!subscription.is_active());
    }
}
