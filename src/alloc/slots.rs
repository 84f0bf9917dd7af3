//! Reutilización de ranuras temporales por barrido lineal.
//!
//! Cada ranura recuerda el índice de la última instrucción que la
//! referencia. Un conjunto ordenado por `(vencimiento, ranura)` permite
//! encontrar en tiempo logarítmico la ranura que se liberó primero.

use std::collections::BTreeSet;

/// Umbral de reutilización de una ranura.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Reuse {
    /// La vida anterior debe terminar antes del índice actual.
    Strict,

    /// La vida anterior puede terminar en el índice actual.
    Inclusive,
}

#[derive(Clone, Debug)]
pub struct SlotPool {
    reuse: Reuse,
    count: u32,
    by_expiry: BTreeSet<(usize, u32)>,
}

impl SlotPool {
    pub fn new(reuse: Reuse) -> Self {
        SlotPool {
            reuse,
            count: 0,
            by_expiry: BTreeSet::new(),
        }
    }

    /// Pool del archivo de registros.
    pub fn registers() -> Self {
        SlotPool::new(Reuse::Strict)
    }

    /// Pool del archivo de bits.
    pub fn bits() -> Self {
        SlotPool::new(Reuse::Inclusive)
    }

    /// Reserva una ranura que nunca se libera.
    pub fn pin(&mut self) -> u32 {
        self.count += 1;
        self.count - 1
    }

    /// Obtiene una ranura para un valor definido en `at` y referenciado
    /// por última vez en `until`.
    pub fn claim(&mut self, at: usize, until: usize) -> u32 {
        let expired = match self.by_expiry.iter().next() {
            Some(&(expiry, slot)) if self.expired(expiry, at) => Some((expiry, slot)),
            _ => None,
        };

        let slot = match expired {
            Some(entry) => {
                self.by_expiry.remove(&entry);
                entry.1
            }

            None => self.pin(),
        };

        self.by_expiry.insert((until, slot));

        slot
    }

    /// Cantidad de ranuras distintas utilizadas.
    pub fn count(&self) -> u32 {
        self.count
    }

    fn expired(&self, expiry: usize, at: usize) -> bool {
        match self.reuse {
            Reuse::Strict => expiry < at,
            Reuse::Inclusive => expiry <= at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_slots_are_never_reused() {
        let mut pool = SlotPool::registers();
        let pinned = pool.pin();

        assert_eq!(pinned, 0);
        assert_eq!(pool.claim(5, 6), 1);
        assert_eq!(pool.claim(100, 101), 1);
        assert_eq!(pool.count(), 2);
    }

    #[test]
    fn earliest_expired_slot_wins() {
        let mut pool = SlotPool::registers();
        assert_eq!(pool.claim(1, 9), 0);
        assert_eq!(pool.claim(2, 4), 1);
        assert_eq!(pool.claim(3, 5), 2);

        // La ranura 1 venció en 4, la 2 en 5
        assert_eq!(pool.claim(6, 7), 1);
        assert_eq!(pool.claim(6, 8), 2);
        assert_eq!(pool.claim(6, 8), 3);
    }

    #[test]
    fn registers_and_bits_differ_at_the_boundary() {
        let mut registers = SlotPool::registers();
        assert_eq!(registers.claim(1, 3), 0);
        assert_eq!(registers.claim(3, 4), 1);
        assert_eq!(registers.claim(4, 5), 0);

        let mut bits = SlotPool::bits();
        assert_eq!(bits.claim(1, 3), 0);
        assert_eq!(bits.claim(3, 4), 0);
        assert_eq!(bits.count(), 1);
    }
}
