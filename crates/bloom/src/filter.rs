use std::f64::consts::LN_2;

use deadpool_redis::{Connection, Pool};
use serde::Serialize;
use sha2::{Digest, Sha256};

use conclave_core::{CoreError, encoding};

use crate::error::BloomError;

/// A fixed-size Bloom filter stored as one Redis string bit array.
pub struct BloomFilter {
    pool: Pool,
    key: String,
    num_elements: usize,
    false_positives: f64,
    /// Bit-array length m.
    bits: u64,
    /// Hash-function count k.
    hashes: u32,
}

impl BloomFilter {
    /// Create a filter sized for `num_elements` insertions at a
    /// `false_positives` error rate.
    ///
    /// # Errors
    ///
    /// [`BloomError::Parameters`] unless `num_elements >= 1` and
    /// `0 < false_positives < 1`.
    pub fn new(
        pool: Pool,
        key: impl Into<String>,
        num_elements: usize,
        false_positives: f64,
    ) -> Result<Self, BloomError> {
        if num_elements == 0 {
            return Err(BloomError::Parameters(
                "num_elements must be at least 1".into(),
            ));
        }
        if !(false_positives > 0.0 && false_positives < 1.0) {
            return Err(BloomError::Parameters(format!(
                "false_positives must be in (0, 1), got {false_positives}"
            )));
        }

        let (bits, hashes) = optimal_parameters(num_elements, false_positives);
        Ok(Self {
            pool,
            key: key.into(),
            num_elements,
            false_positives,
            bits,
            hashes,
        })
    }

    /// The Redis key holding the bit array.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The target population this filter was sized for.
    pub fn num_elements(&self) -> usize {
        self.num_elements
    }

    /// The tolerated false-positive probability.
    pub fn false_positives(&self) -> f64 {
        self.false_positives
    }

    /// Bit-array length m.
    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Hash-function count k.
    pub fn hashes(&self) -> u32 {
        self.hashes
    }

    /// Add one element: set its k bits in a single pipelined batch.
    pub async fn add<T: Serialize + Sync>(&self, element: &T) -> Result<(), BloomError> {
        self.set_bits(&self.positions(element)?).await
    }

    /// Add a batch of elements in a single pipelined round trip.
    ///
    /// Any unrepresentable element fails the whole batch before I/O.
    pub async fn add_many<T: Serialize + Sync>(&self, elements: &[T]) -> Result<(), BloomError> {
        let mut positions = Vec::with_capacity(elements.len() * self.hashes as usize);
        for element in elements {
            positions.extend(self.positions(element)?);
        }
        self.set_bits(&positions).await
    }

    /// Whether the element may have been added. `false` is definitive.
    pub async fn contains<T: Serialize + Sync>(&self, element: &T) -> Result<bool, BloomError> {
        let positions = self.positions(element)?;
        let mut conn = self.conn().await?;
        let bits = read_bits(&mut conn, &self.key, &positions).await?;
        Ok(bits.into_iter().all(|bit| bit))
    }

    /// Membership answers for a batch of elements, aligned with the input,
    /// read in a single pipelined round trip.
    pub async fn contains_many<T: Serialize + Sync>(
        &self,
        elements: &[T],
    ) -> Result<Vec<bool>, BloomError> {
        if elements.is_empty() {
            return Ok(Vec::new());
        }

        let per_element = self.hashes as usize;
        let mut positions = Vec::with_capacity(elements.len() * per_element);
        for element in elements {
            positions.extend(self.positions(element)?);
        }

        let mut conn = self.conn().await?;
        let bits = read_bits(&mut conn, &self.key, &positions).await?;
        Ok(bits
            .chunks(per_element)
            .map(|chunk| chunk.iter().all(|bit| *bit))
            .collect())
    }

    /// Estimate how many elements have been inserted, from the number of set
    /// bits. Saturates at `m / k` once every bit is set.
    pub async fn approximate_size(&self) -> Result<f64, BloomError> {
        let mut conn = self.conn().await?;
        let set_bits: u64 = redis::cmd("BITCOUNT")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        Ok(estimate(self.bits, self.hashes, set_bits))
    }

    /// Drop the bit array.
    pub async fn clear(&self) -> Result<(), BloomError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("DEL")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        Ok(())
    }

    /// The k bit positions for an element, by enhanced double hashing:
    /// `g_i = (h1 + i*h2 + i^2) mod m`, with `(h1, h2)` the first two
    /// big-endian 32-bit words of the SHA-256 of the canonical encoding.
    fn positions<T: Serialize>(&self, element: &T) -> Result<Vec<u64>, BloomError> {
        let encoded = encoding::encode(element)?;
        let digest = Sha256::digest(encoded.as_bytes());
        let h1 = u64::from(u32::from_be_bytes([
            digest[0], digest[1], digest[2], digest[3],
        ]));
        let h2 = u64::from(u32::from_be_bytes([
            digest[4], digest[5], digest[6], digest[7],
        ]));

        Ok((0..u64::from(self.hashes))
            .map(|i| (h1 + i * h2 + i * i) % self.bits)
            .collect())
    }

    async fn set_bits(&self, positions: &[u64]) -> Result<(), BloomError> {
        let mut conn = self.conn().await?;
        let mut pipe = redis::pipe();
        for position in positions {
            let offset = usize::try_from(*position).unwrap_or(usize::MAX);
            pipe.setbit(&self.key, offset, true).ignore();
        }
        pipe.exec_async(&mut conn)
            .await
            .map_err(|e| CoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn conn(&self) -> Result<Connection, BloomError> {
        self.pool
            .get()
            .await
            .map_err(|e| BloomError::Core(CoreError::Connection(e.to_string())))
    }
}

/// One pipelined batch of GETBIT reads.
async fn read_bits(
    conn: &mut Connection,
    key: &str,
    positions: &[u64],
) -> Result<Vec<bool>, BloomError> {
    let mut pipe = redis::pipe();
    for position in positions {
        let offset = usize::try_from(*position).unwrap_or(usize::MAX);
        pipe.getbit(key, offset);
    }
    let bits: Vec<bool> = pipe
        .query_async(conn)
        .await
        .map_err(|e| CoreError::Backend(e.to_string()))?;
    Ok(bits)
}

/// Optimal bit count and hash count for `n` elements at error rate `p`:
/// `m = ceil(-n*ln(p) / ln(2)^2)`, `k = max(1, round((m/n) * ln(2)))`.
// The sizing math moves through f64; the results are far below any
// precision or truncation boundary for realistic populations.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn optimal_parameters(num_elements: usize, false_positives: f64) -> (u64, u32) {
    let n = num_elements as f64;
    let m = (-n * false_positives.ln() / (LN_2 * LN_2)).ceil().max(1.0);
    let k = ((m / n) * LN_2).round().max(1.0);
    (m as u64, k as u32)
}

/// Estimated insertion count from `set_bits` of `m` total bits with `k`
/// hashes per element.
#[allow(clippy::cast_precision_loss)]
fn estimate(m: u64, k: u32, set_bits: u64) -> f64 {
    let m_f = m as f64;
    let k_f = f64::from(k);
    if set_bits >= m {
        return m_f / k_f;
    }
    -(m_f / k_f) * (1.0 - set_bits as f64 / m_f).ln()
}

#[cfg(test)]
mod tests {
    use conclave_core::MasterConfig;

    use super::*;

    fn lazy_filter(n: usize, p: f64) -> BloomFilter {
        let pool = MasterConfig::default()
            .build_pool()
            .expect("pool creation is lazy");
        BloomFilter::new(pool, "bf", n, p).expect("valid parameters")
    }

    #[test]
    fn sizing_for_a_hundred_elements_at_one_percent() {
        let (m, k) = optimal_parameters(100, 0.01);
        assert_eq!(m, 959);
        assert_eq!(k, 7);
    }

    #[test]
    fn degenerate_sizing_still_yields_usable_parameters() {
        let (m, k) = optimal_parameters(1, 0.5);
        assert!(m >= 1);
        assert!(k >= 1);
    }

    #[test]
    fn out_of_range_parameters_are_rejected() {
        let pool = MasterConfig::default()
            .build_pool()
            .expect("pool creation is lazy");
        assert!(matches!(
            BloomFilter::new(pool.clone(), "bf", 0, 0.01),
            Err(BloomError::Parameters(_))
        ));
        assert!(matches!(
            BloomFilter::new(pool.clone(), "bf", 10, 0.0),
            Err(BloomError::Parameters(_))
        ));
        assert!(matches!(
            BloomFilter::new(pool, "bf", 10, 1.0),
            Err(BloomError::Parameters(_))
        ));
    }

    #[test]
    fn positions_are_deterministic_and_in_range() {
        let filter = lazy_filter(100, 0.01);
        let first = filter.positions(&"rajiv").expect("plain string");
        let second = filter.positions(&"rajiv").expect("plain string");

        assert_eq!(first, second);
        assert_eq!(first.len(), filter.hashes() as usize);
        assert!(first.iter().all(|&p| p < filter.bits()));
    }

    #[test]
    fn distinct_elements_hash_differently() {
        let filter = lazy_filter(100, 0.01);
        let a = filter.positions(&"rajiv").expect("plain string");
        let b = filter.positions(&"dan").expect("plain string");
        assert_ne!(a, b);
    }

    #[test]
    fn estimator_is_zero_on_an_empty_filter() {
        assert!((estimate(959, 7, 0)).abs() < f64::EPSILON);
    }

    #[test]
    fn estimator_saturates_when_every_bit_is_set() {
        let saturated = estimate(959, 7, 959);
        assert!((saturated - 959.0 / 7.0).abs() < 1e-9);
    }

    #[test]
    fn estimator_matches_the_closed_form() {
        let m = 959u64;
        let k = 7u32;
        let x = 100u64;
        let expected = -(959.0_f64 / 7.0) * (1.0_f64 - 100.0 / 959.0).ln();
        assert!((estimate(m, k, x) - expected).abs() < 1e-9);
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use conclave_core::MasterConfig;

    use super::*;

    fn test_pool() -> Pool {
        let url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        MasterConfig::new(url).build_pool().expect("pool should build")
    }

    fn test_filter(name: &str) -> BloomFilter {
        let key = format!("conclave-test:bloom:{}:{}", name, uuid::Uuid::new_v4());
        BloomFilter::new(test_pool(), key, 100, 0.01).expect("valid parameters")
    }

    #[tokio::test]
    async fn membership_round_trip() {
        let filter = test_filter("membership");

        filter.add(&"rajiv").await.expect("add");
        assert!(filter.contains(&"rajiv").await.expect("contains"));
        assert!(!filter.contains(&"dan").await.expect("contains"));

        filter.add_many(&["raj", "dan"]).await.expect("add_many");
        let answers = filter
            .contains_many(&["rajiv", "raj", "dan", "luis"])
            .await
            .expect("contains_many");
        assert_eq!(answers, vec![true, true, true, false]);

        filter.clear().await.expect("cleanup");
    }

    #[tokio::test]
    async fn approximate_size_tracks_insertions() {
        let filter = test_filter("size");

        assert!(filter.approximate_size().await.expect("empty size") < 0.5);

        filter
            .add_many(&["a", "b", "c"])
            .await
            .expect("add_many");
        let estimate = filter.approximate_size().await.expect("size");
        assert!(
            (1.0..10.0).contains(&estimate),
            "estimate for 3 insertions was {estimate}"
        );

        filter.clear().await.expect("clear");
        assert!(!filter.contains(&"a").await.expect("contains after clear"));
    }
}
