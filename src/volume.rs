//! Measured dB curve of the device volume scale.
//!
//! Some firmware revisions answer volume queries in dB instead of the raw
//! step value. `STEP_TO_DB[n - 1]` is the level reported for step `n`.

use crate::types::{Volume, MAX_VOLUME};

const STEP_TO_DB: [f64; 100] = [
    -100.3, -92.7, -85.8, -79.5, -73.9, -69.0, -64.6, -61.0, -58.0, -55.6,
    -53.9, -52.0, -50.5, -49.6, -48.7, -47.7, -46.8, -45.9, -45.0, -44.1,
    -43.2, -42.3, -41.4, -40.6, -39.7, -38.9, -38.0, -37.2, -36.4, -35.6,
    -34.8, -34.0, -33.2, -32.4, -31.7, -30.9, -30.2, -29.4, -28.7, -28.0,
    -27.2, -26.5, -25.8, -25.1, -24.5, -23.8, -23.1, -22.5, -21.8, -21.2,
    -20.5, -19.9, -19.3, -18.7, -18.1, -17.5, -16.9, -16.4, -15.8, -15.3,
    -14.7, -14.2, -13.7, -13.1, -12.6, -12.1, -11.6, -11.1, -10.7, -10.2,
    -9.7, -9.3, -8.9, -8.4, -8.0, -7.6, -7.2, -6.8, -6.4, -6.0,
    -5.6, -5.3, -4.9, -4.6, -4.2, -3.9, -3.6, -3.3, -3.0, -2.7,
    -2.4, -2.1, -1.8, -1.6, -1.3, -1.1, -0.9, -0.6, -0.4, 0.0,
];

/// dB reported by the device for a step in 1..=100
pub fn db_for_step(step: Volume) -> Option<f64> {
    if step == 0 || step > MAX_VOLUME {
        return None;
    }
    Some(STEP_TO_DB[usize::from(step) - 1])
}

/// Nearest device step (1..=100) for a reported dB level
pub fn step_for_db(db: f64) -> Volume {
    let idx = STEP_TO_DB.partition_point(|&v| v < db);
    if idx == 0 {
        return 1;
    }
    if idx >= STEP_TO_DB.len() {
        return MAX_VOLUME;
    }
    let below = STEP_TO_DB[idx - 1];
    let above = STEP_TO_DB[idx];
    // idx is the 0-based slot of `above`, so its step is idx + 1
    let nearest = if (above - db).abs() < (db - below).abs() {
        idx + 1
    } else {
        idx
    };
    nearest as Volume
}
