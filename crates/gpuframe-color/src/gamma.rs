//! Gamma lookup tables for transfer-function decode and encode.
//!
//! Tables are computed once per (transfer function, direction) and shared
//! process-wide; converters only hold `Arc`s to them.

use gpuframe_core::TransferFunction;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Number of entries in every gamma table.
pub const GAMMA_LUT_SIZE: usize = 4096;

/// Which way a table maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LutDirection {
    /// Encoded to linear light.
    Decode,
    /// Linear light to encoded.
    Encode,
}

/// A 1D table sampled uniformly over 0..=1.
#[derive(Debug, Clone, PartialEq)]
pub struct GammaLut {
    transfer: TransferFunction,
    direction: LutDirection,
    table: Box<[f32]>,
}

impl GammaLut {
    /// Compute a table. Prefer [`gamma_lut`], which caches.
    pub fn new(transfer: TransferFunction, direction: LutDirection) -> Self {
        let scale = (GAMMA_LUT_SIZE - 1) as f64;
        let table = (0..GAMMA_LUT_SIZE)
            .map(|i| {
                let x = i as f64 / scale;
                let y = match direction {
                    LutDirection::Decode => transfer.to_linear(x),
                    LutDirection::Encode => transfer.from_linear(x),
                };
                y.clamp(0.0, 1.0) as f32
            })
            .collect();
        Self {
            transfer,
            direction,
            table,
        }
    }

    pub fn transfer(&self) -> TransferFunction {
        self.transfer
    }

    pub fn direction(&self) -> LutDirection {
        self.direction
    }

    pub fn table(&self) -> &[f32] {
        &self.table
    }

    /// Look up with linear interpolation between neighbouring entries.
    pub fn lookup(&self, v: f32) -> f32 {
        let last = GAMMA_LUT_SIZE - 1;
        let pos = v.clamp(0.0, 1.0) * last as f32;
        let lo = (pos.floor() as usize).min(last);
        let hi = (lo + 1).min(last);
        let frac = pos - lo as f32;
        self.table[lo] + (self.table[hi] - self.table[lo]) * frac
    }
}

type LutCache = Mutex<HashMap<(TransferFunction, LutDirection), Arc<GammaLut>>>;

fn cache() -> &'static LutCache {
    static CACHE: OnceLock<LutCache> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Shared table for a transfer function, computed on first use.
pub fn gamma_lut(transfer: TransferFunction, direction: LutDirection) -> Arc<GammaLut> {
    let mut cache = cache().lock();
    cache
        .entry((transfer, direction))
        .or_insert_with(|| {
            debug!("Building {:?} gamma table for {}", direction, transfer.name());
            Arc::new(GammaLut::new(transfer, direction))
        })
        .clone()
}
