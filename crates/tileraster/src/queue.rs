use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use crate::tile::Tile;

/// FIFO of tiles waiting to be rasterized.
///
/// Any number of producers may enqueue concurrently; each producer's own
/// order is preserved. There is no deduplication: the same tile name queued
/// twice is built twice.
#[derive(Debug, Default)]
pub struct TileQueue {
    tiles: Mutex<VecDeque<Arc<Tile>>>,
    available: Condvar,
}

impl TileQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, tile: Arc<Tile>) {
        self.tiles.lock().push_back(tile);
        self.available.notify_one();
    }

    pub fn try_dequeue(&self) -> Option<Arc<Tile>> {
        self.tiles.lock().pop_front()
    }

    /// Waits up to `timeout` for a tile.
    ///
    /// Returns `None` on timeout or when woken by [`TileQueue::wake_all`]
    /// while still empty.
    pub fn dequeue_timeout(&self, timeout: Duration) -> Option<Arc<Tile>> {
        let mut tiles = self.tiles.lock();
        if tiles.is_empty() {
            let _ = self.available.wait_for(&mut tiles, timeout);
        }
        tiles.pop_front()
    }

    /// [`TileQueue::dequeue_timeout`] that never hands out a tile once `cancel`
    /// is signalled, even if one is waiting.
    pub fn dequeue_unless_cancelled(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Arc<Tile>> {
        let mut tiles = self.tiles.lock();
        if tiles.is_empty() && !cancel.is_cancelled() {
            let _ = self.available.wait_for(&mut tiles, timeout);
        }
        if cancel.is_cancelled() {
            return None;
        }
        tiles.pop_front()
    }

    /// Wakes every waiting consumer, e.g. so it can observe cancellation.
    pub fn wake_all(&self) {
        // Taking the lock orders the wake-up after any waiter that is about to sleep.
        let _guard = self.tiles.lock();
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        self.tiles.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn tile(name: &str) -> Arc<Tile> {
        Arc::new(Tile::new(name, "1", "/tmp"))
    }

    #[test]
    fn single_producer_order_is_kept() {
        let queue = TileQueue::new();
        for name in ["T1", "T2", "T3"] {
            queue.enqueue(tile(name));
        }

        let names: Vec<String> = std::iter::from_fn(|| queue.try_dequeue())
            .map(|t| t.name().to_owned())
            .collect();
        assert_eq!(names, ["T1", "T2", "T3"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn duplicates_are_not_merged() {
        let queue = TileQueue::new();
        queue.enqueue(tile("T1"));
        queue.enqueue(tile("T1"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn per_producer_order_with_many_producers() {
        let queue = Arc::new(TileQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        queue.enqueue(tile(&format!("{p}-{i}")));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut last_seen = [-1i32; 4];
        let mut total = 0;
        while let Some(t) = queue.try_dequeue() {
            let (p, i) = t.name().split_once('-').unwrap();
            let (p, i): (usize, i32) = (p.parse().unwrap(), i.parse().unwrap());
            assert!(i > last_seen[p], "producer {p} out of order");
            last_seen[p] = i;
            total += 1;
        }
        assert_eq!(total, 1000);
    }

    #[test]
    fn dequeue_timeout_returns_none_when_idle() {
        let queue = TileQueue::new();
        let start = Instant::now();
        assert!(queue.dequeue_timeout(Duration::from_millis(20)).is_none());
        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn dequeue_timeout_wakes_on_enqueue() {
        let queue = Arc::new(TileQueue::new());
        let consumer = {
            let queue = Arc::clone(&queue);
            std::thread::spawn(move || queue.dequeue_timeout(Duration::from_secs(10)))
        };

        std::thread::sleep(Duration::from_millis(20));
        queue.enqueue(tile("T1"));

        let got = consumer.join().unwrap();
        assert_eq!(got.unwrap().name(), "T1");
    }

    #[test]
    fn cancelled_consumer_leaves_tiles_queued() {
        let queue = TileQueue::new();
        queue.enqueue(tile("T1"));

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(queue.dequeue_unless_cancelled(Duration::from_secs(10), &cancel).is_none());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn wake_all_releases_cancelled_waiter() {
        let queue = Arc::new(TileQueue::new());
        let cancel = CancellationToken::new();
        let consumer = {
            let (queue, cancel) = (Arc::clone(&queue), cancel.clone());
            std::thread::spawn(move || {
                let start = Instant::now();
                let got = queue.dequeue_unless_cancelled(Duration::from_secs(30), &cancel);
                (got.is_none(), start.elapsed())
            })
        };

        std::thread::sleep(Duration::from_millis(20));
        cancel.cancel();
        queue.wake_all();

        let (empty, waited) = consumer.join().unwrap();
        assert!(empty);
        assert!(waited < Duration::from_secs(30));
    }
}
