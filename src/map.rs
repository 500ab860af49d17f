//! Thread-safe open-addressed hash table used to intern device handles.

use std::sync::RwLock;

const FNV_OFFSET: u64 = 14695981039346656037;
const FNV_PRIME: u64 = 1099511628211;

const MAP_INIT_SIZE: usize = 32;

/// FNV-1a over the bytes of a pointer-sized key.
fn key_index(key: usize, size: usize) -> usize {
    let mut hash = FNV_OFFSET;
    for i in 0..std::mem::size_of::<usize>() {
        let byte = ((key >> (i * 8)) & 0xff) as u64;
        hash ^= byte;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    (hash % size as u64) as usize
}

struct Table<V> {
    entries: Vec<Option<(usize, V)>>,
    len: usize,
}

impl<V: Clone> Table<V> {
    fn insert(&mut self, key: usize, val: V) {
        let size = self.entries.len();
        let mut i = key_index(key, size);
        for _ in 0..size {
            match &self.entries[i] {
                Some((k, _)) if *k == key => break,
                Some(_) => {}
                None => break,
            }
            i = (i + 1) % size;
        }
        if self.entries[i].is_none() {
            self.len += 1;
        }
        self.entries[i] = Some((key, val));
    }
}

/// Open-addressed map from opaque pointer-sized keys to cloneable handles.
/// Doubles when the load factor reaches one half.
pub struct HandleMap<V> {
    inner: RwLock<Table<V>>,
}

impl<V: Clone> HandleMap<V> {
    pub fn new() -> HandleMap<V> {
        HandleMap {
            inner: RwLock::new(Table {
                entries: (0..MAP_INIT_SIZE).map(|_| None).collect(),
                len: 0,
            }),
        }
    }

    pub fn get(&self, key: usize) -> Option<V> {
        let table = self.inner.read().unwrap();
        let size = table.entries.len();
        let mut i = key_index(key, size);
        for _ in 0..size {
            match &table.entries[i] {
                Some((k, v)) if *k == key => return Some(v.clone()),
                Some(_) => {}
                None => return None,
            }
            i = (i + 1) % size;
        }
        None
    }

    pub fn put(&self, key: usize, val: V) {
        let mut table = self.inner.write().unwrap();

        if table.len >= table.entries.len() / 2 {
            let old: Vec<_> = table.entries.drain(..).collect();
            let new_size = old.len() * 2;
            table.entries = (0..new_size).map(|_| None).collect();
            table.len = 0;
            for slot in old.into_iter().flatten() {
                table.insert(slot.0, slot.1);
            }
        }

        table.insert(key, val);
    }

    pub fn remove(&self, key: usize) -> Option<V> {
        let mut table = self.inner.write().unwrap();
        let size = table.entries.len();
        let mut i = key_index(key, size);
        for _ in 0..size {
            match &table.entries[i] {
                Some((k, _)) if *k == key => {
                    let (_, v) = table.entries[i].take().unwrap();
                    table.len -= 1;
                    return Some(v);
                }
                Some(_) => {}
                None => return None,
            }
            i = (i + 1) % size;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_remove() {
        let m: HandleMap<u64> = HandleMap::new();
        assert_eq!(m.get(0x1000), None);
        m.put(0x1000, 42);
        m.put(0x2000, 43);
        assert_eq!(m.get(0x1000), Some(42));
        assert_eq!(m.get(0x2000), Some(43));
        assert_eq!(m.remove(0x1000), Some(42));
        assert_eq!(m.get(0x1000), None);
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn put_overwrites() {
        let m: HandleMap<u64> = HandleMap::new();
        m.put(7, 1);
        m.put(7, 2);
        assert_eq!(m.get(7), Some(2));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let m: HandleMap<usize> = HandleMap::new();
        for k in 0..200 {
            m.put(k * 8 + 0x1_0000, k);
        }
        for k in 0..200 {
            assert_eq!(m.get(k * 8 + 0x1_0000), Some(k));
        }
        assert_eq!(m.len(), 200);
    }

    #[test]
    fn colliding_keys_probe_linearly() {
        let m: HandleMap<u32> = HandleMap::new();
        // distinct keys, some of which will share a bucket in a 32-entry table
        for k in 0..16usize {
            m.put(k << 20, k as u32);
        }
        for k in 0..16usize {
            assert_eq!(m.get(k << 20), Some(k as u32));
        }
    }
}
