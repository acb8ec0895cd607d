use advanced_cache::{CacheError, Producer};
use futures::future::BoxFuture;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Test data structure for benchmarks
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchUser {
    pub id: u64,
    pub name: String,
    pub email: String,
    pub score: u32,
}

impl BenchUser {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            name: format!("User {}", id),
            email: format!("user{}@example.com", id),
            score: (id % 1000) as u32,
        }
    }
}

/// Errors returned by the fake database.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("user {0} not found")]
    NotFound(u64),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Simulated database with configurable latency
#[derive(Clone)]
pub struct FakeDatabase {
    data: Arc<HashMap<u64, BenchUser>>,
    latency_ms: u64,
    query_count: Arc<AtomicUsize>,
}

impl FakeDatabase {
    pub fn new(num_users: usize, latency_ms: u64) -> Self {
        let data = (0..num_users as u64)
            .map(|id| (id, BenchUser::new(id)))
            .collect();

        Self {
            data: Arc::new(data),
            latency_ms,
            query_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub async fn get(&self, id: u64) -> Result<BenchUser, DbError> {
        self.query_count.fetch_add(1, Ordering::Relaxed);

        // Simulate database latency
        tokio::time::sleep(Duration::from_millis(self.latency_ms)).await;

        self.data.get(&id).cloned().ok_or(DbError::NotFound(id))
    }

    #[allow(dead_code)]
    pub fn query_count(&self) -> usize {
        self.query_count.load(Ordering::Relaxed)
    }

    #[allow(dead_code)]
    pub fn reset_count(&self) {
        self.query_count.store(0, Ordering::Relaxed);
    }
}

/// Producer looking users up by id.
#[derive(Clone)]
pub struct UserLookup {
    pub db: FakeDatabase,
}

impl Producer<u64, BenchUser> for UserLookup {
    type Error = DbError;

    fn produce(&self, id: u64) -> BoxFuture<'static, Result<BenchUser, DbError>> {
        let db = self.db.clone();
        Box::pin(async move { db.get(id).await })
    }
}

/// Generate user ids for different workload patterns
pub struct KeyGenerator {
    num_keys: usize,
}

impl KeyGenerator {
    pub fn new(num_keys: usize) -> Self {
        Self { num_keys }
    }

    /// Generate sequential ids (for cold cache tests)
    pub fn sequential(&self) -> Vec<u64> {
        (0..self.num_keys as u64).collect()
    }

    /// Generate random ids with uniform distribution
    #[allow(dead_code)]
    pub fn uniform_random(&self, count: usize) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        (0..count)
            .map(|_| rng.gen_range(0..self.num_keys as u64))
            .collect()
    }

    /// Generate ids where `hit_ratio` of the requests go to the first
    /// `hit_ratio` share of the id space.
    pub fn mixed(&self, hit_ratio: f64) -> Vec<u64> {
        let mut rng = rand::thread_rng();
        let hot_key_count = ((self.num_keys as f64 * hit_ratio) as u64).max(1);

        (0..1000)
            .map(|_| {
                if rng.gen_bool(hit_ratio) || hot_key_count >= self.num_keys as u64 {
                    rng.gen_range(0..hot_key_count)
                } else {
                    rng.gen_range(hot_key_count..self.num_keys as u64)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    #[tokio::test]
    async fn test_fake_database() {
        use super::FakeDatabase;

        let db = FakeDatabase::new(100, 10);

        let user = db.get(0).await;
        assert_eq!(user.unwrap().id, 0);
        assert!(db.get(500).await.is_err());

        assert_eq!(db.query_count(), 2);
    }

    #[test]
    fn test_key_generator() {
        use super::KeyGenerator;

        let key_gen = KeyGenerator::new(100);

        let seq = key_gen.sequential();
        assert_eq!(seq.len(), 100);
        assert_eq!(seq[0], 0);

        let uniform = key_gen.uniform_random(50);
        assert!(uniform.iter().all(|id| *id < 100));

        let mixed = key_gen.mixed(0.8);
        assert_eq!(mixed.len(), 1000);
    }
}
