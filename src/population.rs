//! The read-only user population every pipeline run operates on.
//!
//! Loaded once at process start, either from a SQLite `users` table or, when
//! no database file is present, synthesized with a fixed seed so the server
//! always has something to segment.

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Coarse city classification used across Indian consumer datasets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CityTier {
    #[serde(rename = "Tier-1")]
    Tier1,
    #[serde(rename = "Tier-2")]
    Tier2,
    #[serde(rename = "Tier-3")]
    Tier3,
}

impl CityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CityTier::Tier1 => "Tier-1",
            CityTier::Tier2 => "Tier-2",
            CityTier::Tier3 => "Tier-3",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Tier-1" => Some(CityTier::Tier1),
            "Tier-2" => Some(CityTier::Tier2),
            "Tier-3" => Some(CityTier::Tier3),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IncomeBand {
    Low,
    Mid,
    High,
}

impl IncomeBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomeBand::Low => "Low",
            IncomeBand::Mid => "Mid",
            IncomeBand::High => "High",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Low" => Some(IncomeBand::Low),
            "Mid" => Some(IncomeBand::Mid),
            "High" => Some(IncomeBand::High),
            _ => None,
        }
    }

    /// Ordinal rank in [0,1] for feature engineering.
    pub fn rank(&self) -> f64 {
        match self {
            IncomeBand::Low => 0.0,
            IncomeBand::Mid => 0.5,
            IncomeBand::High => 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaChannel {
    YouTube,
    Instagram,
    #[serde(rename = "TV")]
    Tv,
    Twitter,
    Reddit,
}

impl MediaChannel {
    pub const ALL: [MediaChannel; 5] = [
        MediaChannel::YouTube,
        MediaChannel::Instagram,
        MediaChannel::Tv,
        MediaChannel::Twitter,
        MediaChannel::Reddit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaChannel::YouTube => "YouTube",
            MediaChannel::Instagram => "Instagram",
            MediaChannel::Tv => "TV",
            MediaChannel::Twitter => "Twitter",
            MediaChannel::Reddit => "Reddit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "YouTube" => Some(MediaChannel::YouTube),
            "Instagram" => Some(MediaChannel::Instagram),
            "TV" => Some(MediaChannel::Tv),
            "Twitter" => Some(MediaChannel::Twitter),
            "Reddit" => Some(MediaChannel::Reddit),
            _ => None,
        }
    }
}

/// One row of the population snapshot. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u32,
    pub age: u8,
    pub income_band: IncomeBand,
    pub city_tier: CityTier,
    pub preferred_media: MediaChannel,
    pub owns_car: bool,
    pub device_count: u8,
    pub emi_flag: bool,
    pub brand_awareness: f64,
    pub price_sensitivity: f64,
    pub privacy_pref: f64,
}

/// Read-only population snapshot, safely shared across requests.
#[derive(Debug)]
pub struct Population {
    records: Vec<UserRecord>,
}

impl Population {
    pub fn new(records: Vec<UserRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[UserRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Load the `users` table from a SQLite database.
    pub fn load_sqlite(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open population database {:?}", path))?;

        let mut stmt = conn
            .prepare(
                "SELECT id, age, income_band, city_tier, preferred_media, owns_car, \
                 device_count, emi_flag, brand_awareness, price_sensitivity, privacy_pref \
                 FROM users",
            )
            .context("Failed to prepare users query (missing users table?)")?;

        let rows = stmt.query_map([], |row| {
            let income: String = row.get(2)?;
            let tier: String = row.get(3)?;
            let media: String = row.get(4)?;
            Ok(UserRecord {
                id: row.get(0)?,
                age: row.get::<_, i64>(1)? as u8,
                income_band: IncomeBand::parse(&income).unwrap_or(IncomeBand::Mid),
                city_tier: CityTier::parse(&tier).unwrap_or(CityTier::Tier2),
                preferred_media: MediaChannel::parse(&media).unwrap_or(MediaChannel::YouTube),
                owns_car: row.get::<_, i64>(5)? != 0,
                device_count: row.get::<_, i64>(6)? as u8,
                emi_flag: row.get::<_, i64>(7)? != 0,
                brand_awareness: row.get(8)?,
                price_sensitivity: row.get(9)?,
                privacy_pref: row.get(10)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row.context("Failed to read user row")?);
        }

        tracing::info!("Loaded {} users from {:?}", records.len(), path);
        Ok(Self::new(records))
    }

    /// Synthesize a population with the same marginal distributions the
    /// dataset generator uses, deterministically from `seed`.
    pub fn synthesize(n: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut records = Vec::with_capacity(n);

        for id in 0..n {
            let age = sample_normal(&mut rng, 34.0, 10.0).clamp(18.0, 65.0) as u8;
            let income_band = weighted_pick(
                &mut rng,
                &[
                    (IncomeBand::Low, 0.40),
                    (IncomeBand::Mid, 0.45),
                    (IncomeBand::High, 0.15),
                ],
            );
            let city_tier = weighted_pick(
                &mut rng,
                &[
                    (CityTier::Tier1, 0.50),
                    (CityTier::Tier2, 0.30),
                    (CityTier::Tier3, 0.20),
                ],
            );
            let preferred_media = weighted_pick(
                &mut rng,
                &[
                    (MediaChannel::YouTube, 0.35),
                    (MediaChannel::Instagram, 0.25),
                    (MediaChannel::Tv, 0.25),
                    (MediaChannel::Twitter, 0.10),
                    (MediaChannel::Reddit, 0.05),
                ],
            );

            records.push(UserRecord {
                id: id as u32,
                age,
                income_band,
                city_tier,
                preferred_media,
                owns_car: rng.gen_bool(0.40),
                device_count: sample_poisson(&mut rng, 3.0).min(8),
                emi_flag: rng.gen_bool(0.45),
                brand_awareness: sample_normal(&mut rng, 0.60, 0.20).clamp(0.0, 1.0),
                price_sensitivity: sample_normal(&mut rng, 0.50, 0.20).clamp(0.0, 1.0),
                privacy_pref: sample_normal(&mut rng, 0.40, 0.25).clamp(0.0, 1.0),
            });
        }

        Self::new(records)
    }
}

/// Box-Muller normal sample.
fn sample_normal(rng: &mut StdRng, mean: f64, std: f64) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
    mean + std * z
}

/// Knuth poisson sample; lambda is small here so the loop is short.
fn sample_poisson(rng: &mut StdRng, lambda: f64) -> u8 {
    let l = (-lambda).exp();
    let mut k = 0u8;
    let mut p = 1.0;
    loop {
        p *= rng.gen::<f64>();
        if p <= l || k == u8::MAX {
            return k;
        }
        k += 1;
    }
}

fn weighted_pick<T: Copy>(rng: &mut StdRng, choices: &[(T, f64)]) -> T {
    let total: f64 = choices.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen::<f64>() * total;
    for (value, weight) in choices {
        if roll < *weight {
            return *value;
        }
        roll -= weight;
    }
    choices[choices.len() - 1].0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesize_is_deterministic_per_seed() {
        let a = Population::synthesize(50, 42);
        let b = Population::synthesize(50, 42);
        for (ra, rb) in a.records().iter().zip(b.records()) {
            assert_eq!(ra.age, rb.age);
            assert_eq!(ra.income_band, rb.income_band);
            assert!((ra.price_sensitivity - rb.price_sensitivity).abs() < 1e-12);
        }
    }

    #[test]
    fn synthesize_respects_field_bounds() {
        let pop = Population::synthesize(500, 7);
        for r in pop.records() {
            assert!((18..=65).contains(&r.age));
            assert!(r.device_count <= 8);
            assert!((0.0..=1.0).contains(&r.brand_awareness));
            assert!((0.0..=1.0).contains(&r.price_sensitivity));
            assert!((0.0..=1.0).contains(&r.privacy_pref));
        }
    }

    #[test]
    fn load_sqlite_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("users.db");
        let conn = Connection::open(&db_path).unwrap();
        conn.execute_batch(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY, age INTEGER, income_band TEXT, city_tier TEXT,
                preferred_media TEXT, owns_car INTEGER, device_count INTEGER,
                emi_flag INTEGER, brand_awareness REAL, price_sensitivity REAL,
                privacy_pref REAL
            );
            INSERT INTO users VALUES
                (0, 22, 'Mid', 'Tier-2', 'YouTube', 0, 3, 1, 0.6, 0.7, 0.4),
                (1, 41, 'High', 'Tier-1', 'TV', 1, 5, 0, 0.8, 0.3, 0.5);",
        )
        .unwrap();
        drop(conn);

        let pop = Population::load_sqlite(&db_path).unwrap();
        assert_eq!(pop.len(), 2);
        assert_eq!(pop.records()[0].city_tier, CityTier::Tier2);
        assert_eq!(pop.records()[1].income_band, IncomeBand::High);
        assert!(pop.records()[0].emi_flag);
    }
}
