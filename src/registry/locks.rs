//! # Locks por Nombre
//! src/registry/locks.rs
//!
//! Serializa create/update/delete sobre un mismo nombre de artefacto sin
//! bloquear operaciones sobre nombres distintos.

use crate::lock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
pub struct KeyLocks {
    table: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ejecuta `f` con el lock del nombre tomado. Al salir, la entrada se
    /// descarta si nadie más la está usando.
    pub fn with_lock<T>(&self, name: &str, f: impl FnOnce() -> T) -> T {
        let entry = {
            let mut table = lock(&self.table);
            Arc::clone(table.entry(name.to_string()).or_default())
        };

        let value = {
            let _guard = lock(&*entry);
            f()
        };

        // Los clones solo se toman con la tabla bloqueada: 2 = tabla + este
        let mut table = lock(&self.table);
        if Arc::strong_count(&entry) == 2 {
            table.remove(name);
        }
        value
    }

    /// Nombres con lock registrado
    pub fn len(&self) -> usize {
        lock(&self.table).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_name_is_serialized() {
        let locks = Arc::new(KeyLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    locks.with_lock("m1", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(10));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();

        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_idle_names_are_pruned() {
        let locks = KeyLocks::new();
        for i in 0..100 {
            locks.with_lock(&format!("m{}", i), || ());
        }
        assert!(locks.is_empty());

        // Mientras un nombre está tomado su entrada sigue en la tabla
        locks.with_lock("held", || assert_eq!(locks.len(), 1));
        assert!(locks.is_empty());
    }

    #[test]
    fn test_different_names_do_not_block() {
        let locks = KeyLocks::new();
        // Lock anidado sobre otro nombre: si compartieran mutex esto se bloquearía
        let value = locks.with_lock("a", || locks.with_lock("b", || 42));
        assert_eq!(value, 42);
    }
}
