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

//! # Group FEC Module
//!
//! Systematic Reed-Solomon style forward error correction for datagram
//! streams. Payloads are admitted in fixed-size groups of `data_shards`
//! shards; each completed group yields `parity_shards` parity shards, and
//! the receiver can rebuild the group's data from any `data_shards` of the
//! `data_shards + parity_shards` total. Shards carry a six byte header
//! (sequence number and kind) that rides outside the erasure-coded region,
//! so headers for recovered shards are synthesized, never decoded.

use crate::error::FecError;
use crate::optimize::MemoryPool;
use aligned_box::AlignedBox;
use std::fmt;
use std::sync::Arc;

pub mod decoder;
pub mod encoder;
pub mod gf_tables;
pub mod matrix;

pub use decoder::{GroupDecoder, DEFAULT_GROUP_WINDOW};
pub use encoder::GroupEncoder;
pub use gf_tables::*;
pub use matrix::CodingMatrix;

/// Bytes of header at the front of every shard: a little-endian u32
/// sequence number followed by a little-endian u16 kind.
pub const HEADER_SIZE: usize = 6;

const KIND_DATA: u16 = 0;
const KIND_PARITY: u16 = 1;

/// What a shard carries: application bytes or parity over its group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardKind {
    Data,
    Parity,
}

impl ShardKind {
    pub fn to_wire(self) -> u16 {
        match self {
            ShardKind::Data => KIND_DATA,
            ShardKind::Parity => KIND_PARITY,
        }
    }

    pub fn from_wire(v: u16) -> Option<Self> {
        match v {
            KIND_DATA => Some(ShardKind::Data),
            KIND_PARITY => Some(ShardKind::Parity),
            _ => None,
        }
    }
}

/// Stamp a shard header onto the front of `buf`.
pub fn write_header(buf: &mut [u8], seq: u32, kind: ShardKind) -> Result<(), FecError> {
    if buf.len() < HEADER_SIZE {
        return Err(FecError::MalformedShard);
    }
    buf[0..4].copy_from_slice(&seq.to_le_bytes());
    buf[4..6].copy_from_slice(&kind.to_wire().to_le_bytes());
    Ok(())
}

/// Parse the header at the front of `buf`. Rejects buffers too short to
/// hold one and kind values this codec never emits.
pub fn read_header(buf: &[u8]) -> Result<(u32, ShardKind), FecError> {
    if buf.len() < HEADER_SIZE {
        return Err(FecError::MalformedShard);
    }
    let seq = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
    let kind = u16::from_le_bytes([buf[4], buf[5]]);
    match ShardKind::from_wire(kind) {
        Some(kind) => Ok((seq, kind)),
        None => Err(FecError::MalformedShard),
    }
}

/// One shard produced by the codec, pool-backed and complete on the wire:
/// the buffer starts at the shard's own header.
pub struct Shard {
    pub seq: u32,
    pub kind: ShardKind,
    data: Option<AlignedBox<[u8]>>,
    len: usize,
    mem_pool: Arc<MemoryPool>,
}

impl Shard {
    pub(crate) fn from_block(
        seq: u32,
        kind: ShardKind,
        block: AlignedBox<[u8]>,
        len: usize,
        mem_pool: Arc<MemoryPool>,
    ) -> Self {
        Self {
            seq,
            kind,
            data: Some(block),
            len,
            mem_pool,
        }
    }

    /// The full wire image, header included.
    pub fn as_bytes(&self) -> &[u8] {
        match self.data {
            Some(ref block) => &block[..self.len],
            None => &[],
        }
    }

    /// The body behind the header.
    pub fn body(&self) -> &[u8] {
        &self.as_bytes()[HEADER_SIZE..]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for Shard {
    fn drop(&mut self) {
        if let Some(block) = self.data.take() {
            self.mem_pool.free(block);
        }
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("seq", &self.seq)
            .field("kind", &self.kind)
            .field("len", &self.len)
            .finish()
    }
}

/// Group geometry and decoder cache sizing, usually read from the `[fec]`
/// section of the application config.
#[derive(Clone, Copy, Debug)]
pub struct FecConfig {
    pub data_shards: usize,
    pub parity_shards: usize,
    pub group_window: usize,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            data_shards: 10,
            parity_shards: 3,
            group_window: DEFAULT_GROUP_WINDOW,
        }
    }
}

impl FecConfig {
    /// Parse the `[fec]` section of a TOML document. Missing fields fall
    /// back to the defaults.
    pub fn from_toml(s: &str) -> Result<Self, Box<dyn std::error::Error>> {
        #[derive(serde::Deserialize)]
        struct Root {
            fec: Section,
        }
        #[derive(serde::Deserialize)]
        struct Section {
            data_shards: Option<usize>,
            parity_shards: Option<usize>,
            group_window: Option<usize>,
        }

        let raw: Root = toml::from_str(s)?;
        let def = FecConfig::default();
        Ok(Self {
            data_shards: raw.fec.data_shards.unwrap_or(def.data_shards),
            parity_shards: raw.fec.parity_shards.unwrap_or(def.parity_shards),
            group_window: raw.fec.group_window.unwrap_or(def.group_window),
        })
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.data_shards == 0 {
            return Err("fec.data_shards must be at least 1".into());
        }
        if self.parity_shards == 0 {
            return Err("fec.parity_shards must be at least 1".into());
        }
        if self.data_shards + self.parity_shards > 256 {
            return Err(format!(
                "fec.data_shards + fec.parity_shards must not exceed 256, got {}",
                self.data_shards + self.parity_shards
            ));
        }
        if self.group_window == 0 {
            return Err("fec.group_window must be at least 1".into());
        }
        Ok(())
    }
}

/// Build an encoder from a config, with shard capacity taken from the pool.
pub fn encoder_from_config(
    cfg: &FecConfig,
    start_seq: u32,
    mem_pool: Arc<MemoryPool>,
) -> Result<GroupEncoder, FecError> {
    cfg.validate()?;
    GroupEncoder::new(cfg.data_shards, cfg.parity_shards, start_seq, mem_pool)
}

/// Build a decoder from a config, with shard capacity taken from the pool.
pub fn decoder_from_config(
    cfg: &FecConfig,
    mem_pool: Arc<MemoryPool>,
) -> Result<GroupDecoder, FecError> {
    cfg.validate()?;
    GroupDecoder::with_group_window(
        cfg.data_shards,
        cfg.parity_shards,
        cfg.group_window,
        mem_pool,
    )
}
