/// A key into a [`Slab`].
///
/// The generation distinguishes successive occupants of the same slot, so a
/// key kept after [`Slab::remove`] never resolves to a later value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct Key {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32, next_free: Option<u32> },
}

/// A generational slab allocator.
///
/// Values are stored in a contiguous vector and addressed by a [`Key`].
/// Freed slots are threaded through an intrusive free list and reused
/// LIFO; every reuse bumps the slot generation.
///
/// This is the backing store for the pairing heap in
/// [`TimerStore`](crate::reactor::timer::TimerStore): nodes link to each
/// other by index instead of by pointer.
pub(crate) struct Slab<T> {
    entries: Vec<Entry<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Slab<T> {
    /// Creates an empty slab with room for `capacity` values.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Inserts a value and returns its key.
    pub(crate) fn insert(&mut self, value: T) -> Key {
        self.len += 1;

        if let Some(index) = self.free_head {
            let entry = &mut self.entries[index as usize];
            let Entry::Vacant {
                generation,
                next_free,
            } = *entry
            else {
                unreachable!("free list points at an occupied slot");
            };

            let generation = generation.wrapping_add(1);
            self.free_head = next_free;
            *entry = Entry::Occupied { generation, value };

            return Key { index, generation };
        }

        let index = u32::try_from(self.entries.len()).expect("slab exceeded u32::MAX slots");
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });

        Key {
            index,
            generation: 0,
        }
    }

    /// Removes and returns the value for `key`, or `None` if the key is stale.
    pub(crate) fn remove(&mut self, key: Key) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;

        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {
                let vacant = Entry::Vacant {
                    generation: key.generation,
                    next_free: self.free_head,
                };
                let Entry::Occupied { value, .. } = std::mem::replace(entry, vacant) else {
                    unreachable!();
                };

                self.free_head = Some(key.index);
                self.len -= 1;
                Some(value)
            }
            _ => None,
        }
    }

    pub(crate) fn get(&self, key: Key) -> Option<&T> {
        match self.entries.get(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        match self.entries.get_mut(key.index as usize)? {
            Entry::Occupied { generation, value } if *generation == key.generation => Some(value),
            _ => None,
        }
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_slots_with_new_generation() {
        let mut slab = Slab::with_capacity(2);
        let a = slab.insert("a");
        assert_eq!(slab.remove(a), Some("a"));

        let b = slab.insert("b");
        assert_eq!(b.index, a.index);
        assert_ne!(b.generation, a.generation);

        assert_eq!(slab.get(a), None);
        assert_eq!(slab.get(b), Some(&"b"));
        assert_eq!(slab.remove(a), None);
        assert_eq!(slab.len(), 1);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut slab = Slab::with_capacity(1);
        let keys: Vec<_> = (0..100).map(|i| slab.insert(i)).collect();

        assert_eq!(slab.len(), 100);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(slab.get(*key), Some(&i));
        }
    }

    #[test]
    fn drops_remaining_values() {
        use std::rc::Rc;

        let marker = Rc::new(());
        {
            let mut slab = Slab::with_capacity(4);
            slab.insert(marker.clone());
            let k = slab.insert(marker.clone());
            slab.remove(k);
            assert_eq!(Rc::strong_count(&marker), 2);
        }
        assert_eq!(Rc::strong_count(&marker), 1);
    }
}
