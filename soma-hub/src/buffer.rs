/**
 * METRIC BUFFER POOL - Rétention bornée des mesures par composant
 *
 * RÔLE : Un anneau FIFO de taille fixe par composant enregistré. Quand
 * un anneau est plein, chaque nouvelle mesure en évince exactement une,
 * la plus ancienne.
 *
 * ARCHITECTURE : Verrouillage à deux niveaux. Un RwLock sur la table des
 * anneaux, un Mutex par anneau. Les push tiennent le verrou de table en
 * lecture (partagé) pendant toute leur écriture, l'attache/détache le
 * prend en écriture : deux composants ne se gênent jamais entre eux, et
 * un détache attend les push en vol avant de solder le compteur global.
 */

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::error::{HubError, HubResult};

/// Une mesure retenue en mémoire.
#[derive(Debug, Clone)]
pub struct MetricSample {
    pub metric: String,
    pub value: f64,
    pub timestamp: OffsetDateTime,
}

type Ring = Arc<Mutex<VecDeque<MetricSample>>>;

pub struct BufferPool {
    capacity: usize,
    rings: RwLock<HashMap<String, Ring>>,
    total: AtomicUsize,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            rings: RwLock::new(HashMap::new()),
            total: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Crée l'anneau d'un composant. Sans effet s'il existe déjà.
    pub fn attach(&self, component: &str) {
        let mut rings = self.rings.write();
        rings
            .entry(component.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))));
    }

    /// Supprime l'anneau d'un composant et rend le nombre de mesures perdues.
    pub fn detach(&self, component: &str) -> usize {
        let removed = self.rings.write().remove(component);
        match removed {
            Some(ring) => {
                let dropped = ring.lock().len();
                self.total.fetch_sub(dropped, Ordering::Relaxed);
                dropped
            }
            None => 0,
        }
    }

    /// Ajoute une mesure. À capacité atteinte, évince exactement la plus
    /// ancienne mesure de ce composant, jamais plus. Le verrou de table
    /// reste tenu (partagé) jusqu'à la mise à jour du compteur : aucun
    /// push ne peut atterrir dans un anneau déjà détaché ni échapper au
    /// solde d'un detach.
    pub fn push(&self, component: &str, sample: MetricSample) -> HubResult<()> {
        let rings = self.rings.read();
        let ring = rings
            .get(component)
            .ok_or_else(|| HubError::UnknownComponent(component.to_string()))?;

        let mut ring = ring.lock();
        let evicted = if ring.len() == self.capacity {
            ring.pop_front();
            true
        } else {
            false
        };
        ring.push_back(sample);
        if !evicted {
            self.total.fetch_add(1, Ordering::Relaxed);
        }
        debug_assert!(ring.len() <= self.capacity);
        Ok(())
    }

    /// Copie ordonnée (du plus ancien au plus récent) des mesures d'un composant.
    pub fn snapshot(&self, component: &str) -> HubResult<Vec<MetricSample>> {
        let rings = self.rings.read();
        let ring = rings
            .get(component)
            .ok_or_else(|| HubError::UnknownComponent(component.to_string()))?;
        let ring = ring.lock();
        Ok(ring.iter().cloned().collect())
    }

    pub fn ring_count(&self) -> usize {
        self.rings.read().len()
    }

    /// Total courant de mesures retenues, tous composants confondus.
    pub fn total(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }

    /// Total recompté anneau par anneau, comparé au compteur. Tous les
    /// anneaux restent verrouillés pendant le recompte : aucune écriture
    /// ne peut se glisser entre le compte et la comparaison. Une
    /// divergence est un bug du pool, jamais corrigée en silence.
    pub fn checked_total(&self) -> usize {
        let rings = self.rings.read();
        let guards: Vec<_> = rings.values().map(|ring| ring.lock()).collect();
        let recount: usize = guards.iter().map(|guard| guard.len()).sum();
        debug_assert_eq!(
            self.total.load(Ordering::Relaxed),
            recount,
            "buffer total counter diverged from ring contents"
        );
        recount
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(metric: &str, value: f64) -> MetricSample {
        MetricSample {
            metric: metric.to_string(),
            value,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_fifo_eviction_keeps_the_newest() {
        let pool = BufferPool::new(6);
        pool.attach("g4t1");

        for value in 1..=7 {
            pool.push("g4t1", sample("temperature", value as f64)).unwrap();
        }

        let values: Vec<f64> = pool
            .snapshot("g4t1")
            .unwrap()
            .into_iter()
            .map(|s| s.value)
            .collect();
        assert_eq!(values, vec![2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(pool.checked_total(), 6);
    }

    #[test]
    fn test_each_push_at_capacity_evicts_exactly_one() {
        let pool = BufferPool::new(3);
        pool.attach("g4t1");
        for value in 0..10 {
            pool.push("g4t1", sample("pulse", value as f64)).unwrap();
            assert!(pool.snapshot("g4t1").unwrap().len() <= 3);
        }
        assert_eq!(pool.snapshot("g4t1").unwrap().len(), 3);
        assert_eq!(pool.checked_total(), 3);
    }

    #[test]
    fn test_snapshot_of_fresh_ring_is_empty() {
        let pool = BufferPool::new(6);
        pool.attach("g4t1");
        assert!(pool.snapshot("g4t1").unwrap().is_empty());
    }

    #[test]
    fn test_push_without_ring_is_refused() {
        let pool = BufferPool::new(6);
        let err = pool.push("ghost", sample("temperature", 1.0)).unwrap_err();
        assert!(matches!(err, HubError::UnknownComponent(_)));
        assert_eq!(pool.total(), 0);
    }

    #[test]
    fn test_detach_releases_the_count() {
        let pool = BufferPool::new(6);
        pool.attach("g4t1");
        pool.attach("g3t1");
        for value in 0..4 {
            pool.push("g4t1", sample("temperature", value as f64)).unwrap();
        }
        pool.push("g3t1", sample("oxygenation", 97.0)).unwrap();
        assert_eq!(pool.checked_total(), 5);

        let dropped = pool.detach("g4t1");
        assert_eq!(dropped, 4);
        assert_eq!(pool.checked_total(), 1);
        assert_eq!(pool.ring_count(), 1);
        assert_eq!(pool.detach("ghost"), 0);
    }

    #[test]
    fn test_attach_is_idempotent() {
        let pool = BufferPool::new(6);
        pool.attach("g4t1");
        pool.push("g4t1", sample("temperature", 36.5)).unwrap();
        pool.attach("g4t1");
        assert_eq!(pool.snapshot("g4t1").unwrap().len(), 1);
    }

    #[test]
    fn test_rings_are_independent() {
        let pool = BufferPool::new(2);
        pool.attach("a");
        pool.attach("b");
        for value in 0..5 {
            pool.push("a", sample("x", value as f64)).unwrap();
        }
        pool.push("b", sample("y", 1.0)).unwrap();

        assert_eq!(pool.snapshot("a").unwrap().len(), 2);
        assert_eq!(pool.snapshot("b").unwrap().len(), 1);
        assert_eq!(pool.checked_total(), 3);
    }

    #[test]
    fn test_concurrent_pushes_keep_the_counter_honest() {
        let pool = Arc::new(BufferPool::new(6));
        let names = ["a", "b", "c", "d"];
        for name in names {
            pool.attach(name);
        }

        let mut handles = Vec::new();
        for name in names {
            let pool = Arc::clone(&pool);
            handles.push(std::thread::spawn(move || {
                for value in 0..100 {
                    pool.push(name, sample("m", value as f64)).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(pool.checked_total(), 4 * 6);
    }

    #[test]
    fn test_pushes_racing_detach_never_skew_the_counter() {
        use std::sync::atomic::AtomicBool;

        // Anneau large : chaque push accepté incrémente le compteur
        let pool = Arc::new(BufferPool::new(1000));
        let stop = Arc::new(AtomicBool::new(false));

        let pusher = {
            let pool = Arc::clone(&pool);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    // Refusé quand l'anneau est absent, compté sinon
                    let _ = pool.push("g4t1", sample("temperature", 36.5));
                }
            })
        };

        for _ in 0..200 {
            pool.attach("g4t1");
            std::thread::yield_now();
            pool.detach("g4t1");
            // L'anneau parti, plus rien ne doit rester au compteur
            assert_eq!(pool.total(), 0);
        }

        stop.store(true, Ordering::Relaxed);
        pusher.join().unwrap();

        assert_eq!(pool.checked_total(), 0);
    }
}
