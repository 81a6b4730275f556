use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};

/// Contiguous slice of the endpoint list handled by a single worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    /// Position of the first endpoint in the full list.
    pub offset: usize,
    pub endpoints: Vec<String>,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.offset + self.endpoints.len()
    }
}

/// Chunks of `size` covering `endpoints[start..]`, in order.
pub fn split_chunks(endpoints: &[String], start: usize, size: usize) -> Vec<Chunk> {
    let size = size.max(1);
    let start = start.min(endpoints.len());
    endpoints[start..]
        .chunks(size)
        .enumerate()
        .map(|(i, slice)| Chunk {
            index: i,
            offset: start + i * size,
            endpoints: slice.to_vec(),
        })
        .collect()
}

/// FIFO of pending chunks shared by the workers.
#[derive(Default)]
pub struct ChunkQueue {
    items: Mutex<VecDeque<Chunk>>,
    notify: Notify,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.items.lock().clear();
    }

    pub fn push(&self, chunk: Chunk) {
        self.items.lock().push_back(chunk);
        self.notify.notify_one();
    }

    pub fn push_all(&self, chunks: impl IntoIterator<Item = Chunk>) {
        for c in chunks {
            self.push(c);
        }
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next chunk, waiting at most `wait` for one to arrive. `None` means
    /// the queue stayed empty for the whole window.
    pub async fn pop(&self, wait: Duration) -> Option<Chunk> {
        let deadline = Instant::now() + wait;
        loop {
            let notified = self.notify.notified();
            let next = self.items.lock().pop_front();
            if next.is_some() {
                return next;
            }
            if timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn eps(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("https://e{}.test/", i)).collect()
    }

    #[test]
    fn test_split_from_offset() {
        let chunks = split_chunks(&eps(7), 4, 2);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].offset, 4);
        assert_eq!(chunks[0].endpoints, vec!["https://e4.test/", "https://e5.test/"]);
        assert_eq!(chunks[1].offset, 6);
        assert_eq!(chunks[1].end(), 7);
        assert!(split_chunks(&eps(3), 3, 2).is_empty());
    }

    #[tokio::test]
    async fn test_fifo_and_timeout() {
        let q = ChunkQueue::new();
        q.push_all(split_chunks(&eps(4), 0, 2));
        assert_eq!(q.len(), 2);
        assert_eq!(q.pop(Duration::from_millis(10)).await.unwrap().offset, 0);
        assert_eq!(q.pop(Duration::from_millis(10)).await.unwrap().offset, 2);
        assert!(q.pop(Duration::from_millis(20)).await.is_none());
    }

    #[tokio::test]
    async fn test_pop_wakes_on_push() {
        let q = Arc::new(ChunkQueue::new());
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.pop(Duration::from_secs(5)).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.push(Chunk { index: 0, offset: 0, endpoints: eps(1) });
        let got = waiter.await.unwrap();
        assert_eq!(got.map(|c| c.offset), Some(0));
    }

    #[test]
    fn test_clear() {
        let q = ChunkQueue::new();
        q.push_all(split_chunks(&eps(3), 0, 1));
        q.clear();
        assert!(q.is_empty());
    }
}
