use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use uuid::Uuid;

/// Whether a periodic task keeps running after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Cancellable fixed-interval task
///
/// A tick that is already running completes; the stop signal is observed
/// before the next one. Dropping the handle stops the task.
pub struct PeriodicTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// # Arguments
    /// * `name` - Label used in logs
    /// * `start` - Instant of the first tick
    /// * `period` - Time between ticks; missed ticks are skipped, not queued
    /// * `tick` - Tick body
    pub fn spawn<F, Fut>(name: String, start: Instant, period: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = TickControl> + Send + 'static,
    {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                        if tick().await == TickControl::Stop {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(task = %name, "Periodic task stopped");
        });

        Self { stop_tx, handle }
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(true);
    }
}

/// Keyed set of periodic tasks, at most one per key
pub struct TaskSet<K> {
    tasks: Arc<Mutex<HashMap<K, PeriodicTask>>>,
}

impl<K> Clone for TaskSet<K> {
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
        }
    }
}

impl<K> Default for TaskSet<K> {
    fn default() -> Self {
        Self {
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K: Eq + Hash> TaskSet<K> {
    pub fn new() -> Self {
        Self::default()
    }

    fn tasks(&self) -> MutexGuard<'_, HashMap<K, PeriodicTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start the task for `key` unless one is already running.
    /// Returns whether a new task was spawned.
    pub fn ensure<F>(&self, key: K, spawn: F) -> bool
    where
        F: FnOnce() -> PeriodicTask,
    {
        let mut tasks = self.tasks();
        if tasks.get(&key).is_some_and(|t| !t.is_finished()) {
            return false;
        }
        tasks.insert(key, spawn());
        true
    }

    /// Signal the task for `key` to stop and forget it
    pub fn stop(&self, key: &K) -> bool {
        match self.tasks().remove(key) {
            Some(task) => {
                task.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, key: &K) -> bool {
        self.tasks().get(key).is_some_and(|t| !t.is_finished())
    }

    pub fn stop_all(&self) {
        for (_, task) in self.tasks().drain() {
            task.stop();
        }
    }
}

/// One exclusive execution slot per entity id
///
/// Multi-step read/cancel/replace sequences for the same entity hold the
/// slot; chase ticks that find it taken are skipped.
#[derive(Clone, Default)]
pub struct EntitySlots {
    slots: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

pub type SlotGuard = OwnedMutexGuard<()>;

impl EntitySlots {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, id: Uuid) -> Arc<AsyncMutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(id).or_default())
    }

    /// Wait for the slot
    pub async fn acquire(&self, id: Uuid) -> SlotGuard {
        self.slot(id).lock_owned().await
    }

    /// Take the slot only if nobody holds it
    pub fn try_acquire(&self, id: Uuid) -> Option<SlotGuard> {
        self.slot(id).try_lock_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: Arc<AtomicUsize>, stop_after: Option<usize>) -> PeriodicTask {
        PeriodicTask::spawn(
            "test".to_string(),
            Instant::now(),
            Duration::from_secs(1),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    match stop_after {
                        Some(limit) if n >= limit => TickControl::Stop,
                        _ => TickControl::Continue,
                    }
                }
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_ticks_until_stopped() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&counter), None);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4); // t=0,1,2,3

        task.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_stops_itself() {
        let counter = Arc::new(AtomicUsize::new(0));
        let task = counting_task(Arc::clone(&counter), Some(2));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert!(task.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_set_keeps_one_per_key() {
        let set: TaskSet<&'static str> = TaskSet::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(set.ensure("a", || counting_task(Arc::clone(&counter), None)));
        assert!(!set.ensure("a", || counting_task(Arc::clone(&counter), None)));
        assert!(set.is_running(&"a"));

        assert!(set.stop(&"a"));
        assert!(!set.stop(&"a"));
        assert!(!set.is_running(&"a"));
    }

    #[tokio::test]
    async fn test_entity_slot_is_exclusive() {
        let slots = EntitySlots::new();
        let id = Uuid::new_v4();

        let guard = slots.try_acquire(id).expect("slot should be free");
        assert!(slots.try_acquire(id).is_none());
        assert!(slots.try_acquire(Uuid::new_v4()).is_some());

        drop(guard);
        assert!(slots.try_acquire(id).is_some());
        let _held = slots.acquire(id).await;
    }
}
