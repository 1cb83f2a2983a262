use crate::error::FecError;
use crate::fec::matrix::CodingMatrix;
use crate::fec::{write_header, Shard, ShardKind, HEADER_SIZE};
use crate::optimize::MemoryPool;
use crate::telemetry;
use aligned_box::AlignedBox;
use log::debug;
use std::sync::Arc;

/// Groupwise systematic encoder.
///
/// Each call to [`encode`](GroupEncoder::encode) stamps the next sequence
/// number into the caller's buffer and accumulates a copy of the body.
/// Once `data_shards` bodies are buffered the parity shards for the group
/// are computed and handed back; between boundaries the call returns an
/// empty vector.
pub struct GroupEncoder {
    data_shards: usize,
    parity_shards: usize,
    /// Shards per group, data plus parity.
    group_len: usize,
    /// Largest wire shard (header plus body) a pool block can hold.
    max_shard_len: usize,
    /// Sequence number the next accepted payload will carry.
    next_seq: u32,
    /// Sequence numbers live in `[0, paws)`; the bound is the largest
    /// multiple of `group_len`, so a group never straddles the wrap.
    paws: u32,
    /// Bodies buffered for the group in progress.
    cache: Vec<AlignedBox<[u8]>>,
    cache_lens: Vec<usize>,
    cached: usize,
    max_body: usize,
    matrix: CodingMatrix,
    mem_pool: Arc<MemoryPool>,
}

impl GroupEncoder {
    /// Create an encoder starting at `start_seq`. A start that does not
    /// fall on a group boundary is rounded up to the next one, since the
    /// decoder derives group membership from `seq / group_len`.
    pub fn new(
        data_shards: usize,
        parity_shards: usize,
        start_seq: u32,
        mem_pool: Arc<MemoryPool>,
    ) -> Result<Self, FecError> {
        let matrix = CodingMatrix::systematic(data_shards, parity_shards)?;
        let group_len = data_shards + parity_shards;
        let max_shard_len = mem_pool.block_size();
        if max_shard_len <= HEADER_SIZE {
            return Err(FecError::Config(format!(
                "pool block size {} cannot hold a shard header",
                max_shard_len
            )));
        }
        let paws = (u32::MAX / group_len as u32) * group_len as u32;
        let rem = start_seq % group_len as u32;
        // Round up in u64: a start just below the wrap bound would
        // otherwise overflow u32 before the reduction.
        let next_seq = if rem == 0 {
            start_seq % paws
        } else {
            ((u64::from(start_seq) - u64::from(rem) + group_len as u64) % u64::from(paws)) as u32
        };
        let cache = (0..data_shards).map(|_| mem_pool.alloc()).collect();
        Ok(Self {
            data_shards,
            parity_shards,
            group_len,
            max_shard_len,
            next_seq,
            paws,
            cache,
            cache_lens: vec![0; data_shards],
            cached: 0,
            max_body: 0,
            matrix,
            mem_pool,
        })
    }

    /// Sequence number the next accepted payload will be stamped with.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    /// Admit one payload to the group in progress.
    ///
    /// `payload[..offset]` is untouched transport preamble. The six bytes
    /// at `payload[offset..]` are overwritten with the shard header; the
    /// rest is the body. Returns the group's parity shards when this
    /// payload completes it, each a standalone wire image starting at its
    /// own header. On error the buffer is unmodified and no sequence
    /// number is consumed.
    pub fn encode(&mut self, payload: &mut [u8], offset: usize) -> Result<Vec<Shard>, FecError> {
        if payload.len() < offset + HEADER_SIZE {
            return Err(FecError::MalformedShard);
        }
        let shard_len = payload.len() - offset;
        if shard_len > self.max_shard_len {
            return Err(FecError::PayloadTooLarge {
                len: shard_len,
                max: self.max_shard_len,
            });
        }

        write_header(&mut payload[offset..], self.next_seq, ShardKind::Data)?;
        // Data increments stay below paws because groups are aligned and
        // never straddle the wrap point.
        self.next_seq += 1;

        let body = &payload[offset + HEADER_SIZE..];
        let slot = self.cached;
        self.cache[slot][..body.len()].copy_from_slice(body);
        self.cache_lens[slot] = body.len();
        self.max_body = self.max_body.max(body.len());
        self.cached += 1;

        if self.cached < self.data_shards {
            return Ok(Vec::new());
        }
        self.finish_group()
    }

    /// Compute the parity shards for the buffered group and reset for the
    /// next one.
    fn finish_group(&mut self) -> Result<Vec<Shard>, FecError> {
        let group_base = self.next_seq - self.data_shards as u32;
        let max_body = self.max_body;

        // The cache blocks persist across groups, so bodies shorter than
        // the group maximum must have their tails re-zeroed by hand.
        for slot in 0..self.data_shards {
            let len = self.cache_lens[slot];
            if len < max_body {
                self.cache[slot][len..max_body].fill(0);
            }
        }

        let data_refs: Vec<&[u8]> = self
            .cache
            .iter()
            .map(|block| &block[..max_body])
            .collect();

        let mut blocks: Vec<AlignedBox<[u8]>> = (0..self.parity_shards)
            .map(|_| self.mem_pool.alloc())
            .collect();
        for (i, block) in blocks.iter_mut().enumerate() {
            let seq = group_base + (self.data_shards + i) as u32;
            write_header(&mut block[..], seq, ShardKind::Parity)?;
        }
        {
            let mut parity_refs: Vec<&mut [u8]> = blocks
                .iter_mut()
                .map(|block| &mut block[HEADER_SIZE..HEADER_SIZE + max_body])
                .collect();
            self.matrix.encode_parity(&data_refs, &mut parity_refs);
        }

        let shards: Vec<Shard> = blocks
            .into_iter()
            .enumerate()
            .map(|(i, block)| {
                let seq = group_base + (self.data_shards + i) as u32;
                Shard::from_block(
                    seq,
                    ShardKind::Parity,
                    block,
                    HEADER_SIZE + max_body,
                    Arc::clone(&self.mem_pool),
                )
            })
            .collect();

        telemetry::PARITY_SHARDS_EMITTED.inc_by(self.parity_shards as u64);
        debug!(
            "group {} complete: {} parity shards of {} bytes",
            group_base / self.group_len as u32,
            self.parity_shards,
            HEADER_SIZE + max_body
        );

        self.cached = 0;
        self.max_body = 0;
        self.cache_lens.fill(0);
        self.next_seq = (group_base + self.group_len as u32) % self.paws;
        Ok(shards)
    }
}

impl Drop for GroupEncoder {
    fn drop(&mut self) {
        for block in std::mem::take(&mut self.cache) {
            self.mem_pool.free(block);
        }
    }
}
