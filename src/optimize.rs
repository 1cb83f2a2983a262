// Copyright (c) 2025, The FecWeave Project Authors.
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//     * Redistributions of source code must retain the above copyright
//       notice, this list of conditions and the following disclaimer.
//
//     * Redistributions in binary form must reproduce the above
//       copyright notice, this list of conditions and the following disclaimer
//       in the documentation and/or other materials provided with the
//       distribution.
//
//     * Neither the name of the copyright holder nor the names of its
//       contributors may be used to endorse or promote products derived from
//       this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

//! # Optimization Module
//!
//! Runtime CPU feature detection, dispatch to the best available kernel
//! tier, and the aligned memory pool that backs every shard buffer in the
//! codec.

use crate::telemetry;
use aligned_box::AlignedBox;
use log::info;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
cpufeatures::new!(cpuid_avx2, "avx2");
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
cpufeatures::new!(cpuid_ssse3, "ssse3");

/// Blocks are cache-line aligned so SIMD loads never straddle a line start.
pub const BLOCK_ALIGN: usize = 64;

/// Configuration for the memory pool, settable from the CLI or a config file.
#[derive(Clone, Copy, Debug)]
pub struct OptimizeConfig {
    pub pool_capacity: usize,
    pub block_size: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            pool_capacity: 1024,
            block_size: 2048,
        }
    }
}

impl OptimizeConfig {
    /// Parse the `[optimize]` section of a TOML document. Missing fields
    /// fall back to the defaults.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        #[derive(serde::Deserialize)]
        struct Root {
            optimize: Section,
        }
        #[derive(serde::Deserialize)]
        struct Section {
            pool_capacity: Option<usize>,
            block_size: Option<usize>,
        }

        let raw: Root = toml::from_str(s)?;
        let def = OptimizeConfig::default();
        Ok(Self {
            pool_capacity: raw.optimize.pool_capacity.unwrap_or(def.pool_capacity),
            block_size: raw.optimize.block_size.unwrap_or(def.block_size),
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.pool_capacity == 0 {
            return Err("optimize.pool_capacity must be at least 1".into());
        }
        if self.block_size < BLOCK_ALIGN {
            return Err(format!(
                "optimize.block_size must be at least {} bytes",
                BLOCK_ALIGN
            ));
        }
        Ok(())
    }
}

/// CPU features relevant to the field-arithmetic kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuFeature {
    // x86/x64 features
    AVX2,
    SSSE3,

    // ARM features
    NEON,
}

/// Singleton for accessing detected CPU features.
/// Detection runs once; every later call returns the cached result.
pub struct FeatureDetector {
    features: HashMap<CpuFeature, bool>,
}

static INIT: Once = Once::new();
static mut DETECTOR: Option<FeatureDetector> = None;

impl FeatureDetector {
    pub fn instance() -> &'static FeatureDetector {
        unsafe {
            INIT.call_once(|| {
                let detector = FeatureDetector::detect();
                telemetry::SIMD_ACTIVE.set(detector.simd_level());
                info!(
                    "cpu features detected: avx2={} ssse3={} neon={}",
                    detector.has_feature(CpuFeature::AVX2),
                    detector.has_feature(CpuFeature::SSSE3),
                    detector.has_feature(CpuFeature::NEON)
                );
                DETECTOR = Some(detector);
            });
            DETECTOR.as_ref().unwrap()
        }
    }

    fn detect() -> Self {
        #[allow(unused_mut)]
        let mut features = HashMap::new();

        #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
        {
            features.insert(CpuFeature::AVX2, cpuid_avx2::get());
            features.insert(CpuFeature::SSSE3, cpuid_ssse3::get());
        }

        #[cfg(target_arch = "aarch64")]
        {
            features.insert(
                CpuFeature::NEON,
                std::arch::is_aarch64_feature_detected!("neon"),
            );
        }

        Self { features }
    }

    pub fn has_feature(&self, feature: CpuFeature) -> bool {
        *self.features.get(&feature).unwrap_or(&false)
    }

    fn simd_level(&self) -> i64 {
        if self.has_feature(CpuFeature::AVX2) {
            2
        } else if self.has_feature(CpuFeature::SSSE3) || self.has_feature(CpuFeature::NEON) {
            1
        } else {
            0
        }
    }
}

/// Marker trait for the kernel tiers the dispatcher can hand out.
pub trait SimdPolicy: Sync {
    fn as_any(&self) -> &dyn Any;
}

pub struct Avx2;
impl SimdPolicy for Avx2 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Ssse3;
impl SimdPolicy for Ssse3 {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Neon;
impl SimdPolicy for Neon {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct Scalar;
impl SimdPolicy for Scalar {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Run `f` with the widest kernel tier the host supports.
pub fn dispatch<F, R>(f: F) -> R
where
    F: FnOnce(&dyn SimdPolicy) -> R,
{
    let detector = FeatureDetector::instance();
    if detector.has_feature(CpuFeature::AVX2) {
        f(&Avx2)
    } else if detector.has_feature(CpuFeature::SSSE3) {
        f(&Ssse3)
    } else if detector.has_feature(CpuFeature::NEON) {
        f(&Neon)
    } else {
        f(&Scalar)
    }
}

/// A thread-safe pool of cache-line-aligned, fixed-size blocks.
///
/// Blocks start zeroed and are re-zeroed when they come back, so a block
/// handed out by `alloc` never carries bytes from a previous owner. The
/// codec leans on that invariant for its padding semantics.
pub struct MemoryPool {
    pool: Mutex<Vec<AlignedBox<[u8]>>>,
    block_size: usize,
    capacity: usize,
    in_use: AtomicUsize,
}

impl MemoryPool {
    /// Create a pool with `capacity` pre-allocated blocks of `block_size` bytes.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        let pool = (0..capacity)
            .map(|_| AlignedBox::slice_from_default(BLOCK_ALIGN, block_size).unwrap())
            .collect();
        telemetry::MEM_POOL_FREE.set(capacity as i64);
        telemetry::MEM_POOL_IN_USE.set(0);
        Self {
            pool: Mutex::new(pool),
            block_size,
            capacity,
            in_use: AtomicUsize::new(0),
        }
    }

    pub fn from_cfg(cfg: &OptimizeConfig) -> Self {
        Self::new(cfg.pool_capacity, cfg.block_size)
    }

    /// Pop a zeroed block from the free list, or allocate a fresh one if
    /// the list is empty.
    pub fn alloc(&self) -> AlignedBox<[u8]> {
        let block = {
            let mut pool = self.pool.lock().unwrap();
            pool.pop()
        };
        let block = match block {
            Some(b) => {
                telemetry::MEM_POOL_FREE.dec();
                b
            }
            None => {
                telemetry::MEM_POOL_EXHAUSTED.inc();
                AlignedBox::slice_from_default(BLOCK_ALIGN, self.block_size).unwrap()
            }
        };
        self.in_use.fetch_add(1, Ordering::Relaxed);
        telemetry::MEM_POOL_IN_USE.inc();
        block
    }

    /// Zero a block and return it to the free list. Blocks beyond the
    /// configured capacity are dropped instead of retained.
    pub fn free(&self, mut block: AlignedBox<[u8]>) {
        for byte in block.iter_mut() {
            *byte = 0;
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
        telemetry::MEM_POOL_IN_USE.dec();
        let mut pool = self.pool.lock().unwrap();
        if pool.len() < self.capacity {
            pool.push(block);
            telemetry::MEM_POOL_FREE.inc();
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::Relaxed)
    }
}
