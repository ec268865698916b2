use std::sync::LazyLock;

use crossbeam_queue::ArrayQueue;

use super::Event;

/// Events kept per class before `put` starts dropping them on the floor.
const CLASS_SLOTS: usize = 1024;

/// The four backing-buffer classes events are pooled by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    Small,
    Medium,
    Large,
    Max,
}

impl SizeClass {
    pub const fn capacity(self) -> usize {
        match self {
            SizeClass::Small => 256,
            SizeClass::Medium => 512,
            SizeClass::Large => 1024,
            SizeClass::Max => 4096,
        }
    }

    /// The smallest class whose buffer fits `len` bytes. None for zero
    /// (nothing to carry) and for payloads beyond the largest class.
    pub fn fitting(len: usize) -> Option<SizeClass> {
        match len {
            0 => None,
            1..=256 => Some(SizeClass::Small),
            257..=512 => Some(SizeClass::Medium),
            513..=1024 => Some(SizeClass::Large),
            1025..=4096 => Some(SizeClass::Max),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            SizeClass::Small => 0,
            SizeClass::Medium => 1,
            SizeClass::Large => 2,
            SizeClass::Max => 3,
        }
    }
}

/// Size-classed free-lists of event carriers. Reusing a carrier keeps its
/// field-map capacities and backing buffer allocation across parses, so
/// steady-state operation stays off the allocator.
pub struct Pool {
    classes: [ArrayQueue<Event>; 4],
}

impl Pool {
    pub fn new() -> Self {
        Pool {
            classes: [
                ArrayQueue::new(CLASS_SLOTS),
                ArrayQueue::new(CLASS_SLOTS),
                ArrayQueue::new(CLASS_SLOTS),
                ArrayQueue::new(CLASS_SLOTS),
            ],
        }
    }

    /// An event whose backing buffer holds at least `data_len` bytes, with
    /// `fields` and `tags` cleared in place and `size` stamped to
    /// `data_len`. None when no class fits: the caller allocates a one-shot
    /// event instead (marked by `size == 0`).
    pub fn get(&self, data_len: usize) -> Option<Event> {
        let class = SizeClass::fitting(data_len)?;
        let mut event = self.classes[class.index()]
            .pop()
            .unwrap_or_else(|| Event::with_capacity(class.capacity()));
        event.recycle(data_len, class.capacity());
        Some(event)
    }

    /// Hand a carrier back to the class for its size. Free for one-shot
    /// events; a full class drops the carrier.
    pub fn put(&self, event: Event) {
        if let Some(class) = SizeClass::fitting(event.size()) {
            let _ = self.classes[class.index()].push(event);
        }
    }
}

impl Default for Pool {
    fn default() -> Self {
        Pool::new()
    }
}

/// The process-wide pool shared by codecs and outputs.
pub fn shared() -> &'static Pool {
    static POOL: LazyLock<Pool> = LazyLock::new(Pool::new);
    &POOL
}

#[cfg(test)]
mod tests {
    use super::{Pool, SizeClass};
    use crate::event::{Event, Value};

    #[test]
    fn class_boundaries() {
        assert_eq!(SizeClass::fitting(0), None);
        assert_eq!(SizeClass::fitting(1), Some(SizeClass::Small));
        assert_eq!(SizeClass::fitting(256), Some(SizeClass::Small));
        assert_eq!(SizeClass::fitting(257), Some(SizeClass::Medium));
        assert_eq!(SizeClass::fitting(1024), Some(SizeClass::Large));
        assert_eq!(SizeClass::fitting(4096), Some(SizeClass::Max));
        assert_eq!(SizeClass::fitting(4097), None);
    }

    #[test]
    fn get_stamps_size_and_clears_state() {
        let pool = Pool::new();
        let mut event = pool.get(300).unwrap();
        assert_eq!(event.size(), 300);
        assert!(event.fields.is_empty());
        assert!(event.tags.is_empty());

        event.fields.insert("k".into(), Value::from("v"));
        event.tags.insert("t".into(), 1);
        pool.put(event);

        let event = pool.get(300).unwrap();
        assert_eq!(event.size(), 300);
        assert!(event.fields.is_empty());
        assert!(event.tags.is_empty());
    }

    #[test]
    fn oversized_and_empty_payloads_are_not_pooled() {
        let pool = Pool::new();
        assert!(pool.get(4097).is_none());
        assert!(pool.get(0).is_none());
        // put of a one-shot is free of charge
        pool.put(Event::one_shot());
    }

    #[test]
    fn reuses_backing_buffer() {
        let pool = Pool::new();
        let mut event = pool.get(64).unwrap();
        let view = event.put_bytes(b"some message");
        event.fields.insert("message".into(), Value::Bytes(view));
        pool.put(event);

        let mut event = pool.get(64).unwrap();
        let view = event.put_bytes(b"another message");
        assert_eq!(&view[..], b"another message");
    }

    #[test]
    fn concurrent_get_put() {
        let pool = std::sync::Arc::new(Pool::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            handles.push(std::thread::spawn(move || {
                for i in 1..500usize {
                    if let Some(event) = pool.get(i % 4096 + 1) {
                        pool.put(event);
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
