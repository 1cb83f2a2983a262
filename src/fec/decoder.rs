use crate::error::FecError;
use crate::fec::matrix::CodingMatrix;
use crate::fec::{read_header, write_header, Shard, ShardKind, HEADER_SIZE};
use crate::optimize::MemoryPool;
use crate::telemetry;
use aligned_box::AlignedBox;
use log::{debug, warn};
use std::sync::Arc;

/// Group slots a decoder keeps live before evicting the furthest-behind one.
pub const DEFAULT_GROUP_WINDOW: usize = 8;

/// Buffered arrivals for one group.
struct GroupSlot {
    group_id: u32,
    /// One entry per shard index within the group, data then parity.
    bodies: Vec<Option<AlignedBox<[u8]>>>,
    lens: Vec<usize>,
    present: usize,
}

impl GroupSlot {
    fn new(group_id: u32, group_len: usize) -> Self {
        let mut bodies = Vec::with_capacity(group_len);
        bodies.resize_with(group_len, || None);
        Self {
            group_id,
            bodies,
            lens: vec![0; group_len],
            present: 0,
        }
    }
}

/// Groupwise decoder.
///
/// Feed every arriving shard to [`decode`](GroupDecoder::decode). The
/// moment a group has `data_shards` distinct shards buffered it is
/// resolved: either every data shard already arrived, or the missing ones
/// are reconstructed and returned. Groups that never reach the threshold
/// age out of the slot cache and are dropped without error.
pub struct GroupDecoder {
    data_shards: usize,
    group_len: usize,
    max_shard_len: usize,
    group_window: usize,
    slots: Vec<GroupSlot>,
    /// Count of distinct group ids before the sequence space wraps.
    group_modulus: u32,
    /// Wrap-aware newest group seen, the reference point for eviction.
    newest_group: Option<u32>,
    matrix: CodingMatrix,
    mem_pool: Arc<MemoryPool>,
}

impl GroupDecoder {
    pub fn new(
        data_shards: usize,
        parity_shards: usize,
        mem_pool: Arc<MemoryPool>,
    ) -> Result<Self, FecError> {
        Self::with_group_window(data_shards, parity_shards, DEFAULT_GROUP_WINDOW, mem_pool)
    }

    pub fn with_group_window(
        data_shards: usize,
        parity_shards: usize,
        group_window: usize,
        mem_pool: Arc<MemoryPool>,
    ) -> Result<Self, FecError> {
        if group_window == 0 {
            return Err(FecError::Config("group_window must be at least 1".into()));
        }
        let matrix = CodingMatrix::systematic(data_shards, parity_shards)?;
        let max_shard_len = mem_pool.block_size();
        if max_shard_len <= HEADER_SIZE {
            return Err(FecError::Config(format!(
                "pool block size {} cannot hold a shard header",
                max_shard_len
            )));
        }
        let group_len = data_shards + parity_shards;
        Ok(Self {
            data_shards,
            group_len,
            max_shard_len,
            group_window,
            slots: Vec::with_capacity(group_window),
            group_modulus: u32::MAX / group_len as u32,
            newest_group: None,
            matrix,
            mem_pool,
        })
    }

    /// Group slots currently cached.
    pub fn active_groups(&self) -> usize {
        self.slots.len()
    }

    /// Ingest one shard as it came off the wire, header first.
    ///
    /// Returns the data shards this arrival allowed to be reconstructed,
    /// in ascending sequence order, each a full wire image with a
    /// synthesized header. Most calls return an empty vector: buffering,
    /// duplicates, already-complete groups and unrecoverable groups all
    /// resolve silently.
    pub fn decode(&mut self, raw: &[u8]) -> Result<Vec<Shard>, FecError> {
        let (seq, kind) = match read_header(raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                telemetry::MALFORMED_SHARDS.inc();
                return Err(e);
            }
        };
        if raw.len() > self.max_shard_len {
            telemetry::MALFORMED_SHARDS.inc();
            return Err(FecError::PayloadTooLarge {
                len: raw.len(),
                max: self.max_shard_len,
            });
        }

        // Group membership and the data/parity split both derive from the
        // sequence number alone; the kind field only had to parse.
        let _ = kind;
        let group_id = seq / self.group_len as u32;
        let index = (seq % self.group_len as u32) as usize;

        let slot_idx = self.slot_for(group_id);
        let slot = &mut self.slots[slot_idx];
        if slot.bodies[index].is_some() {
            telemetry::DUPLICATE_SHARDS.inc();
            return Ok(Vec::new());
        }

        let body = &raw[HEADER_SIZE..];
        let mut block = self.mem_pool.alloc();
        block[..body.len()].copy_from_slice(body);
        let slot = &mut self.slots[slot_idx];
        slot.bodies[index] = Some(block);
        slot.lens[index] = body.len();
        slot.present += 1;

        if slot.present < self.data_shards {
            return Ok(Vec::new());
        }

        let slot = self.slots.swap_remove(slot_idx);
        telemetry::ACTIVE_GROUPS.set(self.slots.len() as i64);
        self.resolve_group(slot)
    }

    /// Find the slot for `group_id`, creating it (and evicting the
    /// furthest-behind group if the cache is full) when absent.
    fn slot_for(&mut self, group_id: u32) -> usize {
        let newest = match self.newest_group {
            None => group_id,
            Some(newest) => {
                let ahead = cyclic_ahead(newest, group_id, self.group_modulus);
                if ahead != 0 && ahead < self.group_modulus / 2 {
                    group_id
                } else {
                    newest
                }
            }
        };
        self.newest_group = Some(newest);

        if let Some(idx) = self.slots.iter().position(|s| s.group_id == group_id) {
            return idx;
        }
        if self.slots.len() == self.group_window {
            let victim = self
                .slots
                .iter()
                .enumerate()
                .max_by_key(|(_, s)| cyclic_ahead(s.group_id, newest, self.group_modulus))
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            let evicted = self.slots.swap_remove(victim);
            debug!(
                "evicting group {} with {} of {} shards buffered",
                evicted.group_id, evicted.present, self.group_len
            );
            telemetry::GROUPS_EVICTED.inc();
            self.release(evicted);
        }
        self.slots.push(GroupSlot::new(group_id, self.group_len));
        telemetry::ACTIVE_GROUPS.set(self.slots.len() as i64);
        self.slots.len() - 1
    }

    /// A slot that reached `data_shards` buffered shards is decodable.
    /// Hand back the missing data shards, or nothing when none were lost.
    fn resolve_group(&mut self, slot: GroupSlot) -> Result<Vec<Shard>, FecError> {
        let missing: Vec<usize> = (0..self.data_shards)
            .filter(|&i| slot.bodies[i].is_none())
            .collect();
        if missing.is_empty() {
            telemetry::GROUPS_COMPLETED.inc();
            self.release(slot);
            return Ok(Vec::new());
        }

        // Reconstruction runs over bodies padded to the longest present
        // one. Pool blocks are zeroed, so the padding is already in place
        // past each stored length.
        let max_body = slot
            .lens
            .iter()
            .zip(slot.bodies.iter())
            .filter(|(_, b)| b.is_some())
            .map(|(&len, _)| len)
            .max()
            .unwrap_or(0);

        let present: Vec<(usize, &[u8])> = slot
            .bodies
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.as_deref().map(|body| (i, &body[..max_body])))
            .collect();

        let group_base = slot.group_id * self.group_len as u32;
        let mut blocks: Vec<(u32, AlignedBox<[u8]>)> = Vec::with_capacity(missing.len());
        for &i in &missing {
            let seq = group_base + i as u32;
            let mut block = self.mem_pool.alloc();
            write_header(&mut block[..], seq, ShardKind::Data)?;
            blocks.push((seq, block));
        }

        let result = {
            let mut out_refs: Vec<&mut [u8]> = blocks
                .iter_mut()
                .map(|(_, block)| &mut block[HEADER_SIZE..HEADER_SIZE + max_body])
                .collect();
            self.matrix.reconstruct_data(&present, &missing, &mut out_refs)
        };

        match result {
            Ok(()) => {
                let shards: Vec<Shard> = blocks
                    .into_iter()
                    .map(|(seq, block)| {
                        Shard::from_block(
                            seq,
                            ShardKind::Data,
                            block,
                            HEADER_SIZE + max_body,
                            Arc::clone(&self.mem_pool),
                        )
                    })
                    .collect();
                telemetry::SHARDS_RECOVERED.inc_by(shards.len() as u64);
                telemetry::GROUPS_COMPLETED.inc();
                debug!(
                    "group {}: reconstructed {} data shards",
                    slot.group_id,
                    shards.len()
                );
                self.release(slot);
                Ok(shards)
            }
            Err(FecError::SingularMatrix) => {
                // Construction guarantees invertibility; treat a singular
                // system as corruption and drop the group whole.
                warn!(
                    "group {}: singular coefficient matrix, dropping group",
                    slot.group_id
                );
                for (_, block) in blocks {
                    self.mem_pool.free(block);
                }
                self.release(slot);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Return every buffered body of a retired slot to the pool.
    fn release(&self, slot: GroupSlot) {
        for body in slot.bodies.into_iter().flatten() {
            self.mem_pool.free(body);
        }
    }
}

impl Drop for GroupDecoder {
    fn drop(&mut self) {
        for slot in std::mem::take(&mut self.slots) {
            self.release(slot);
        }
    }
}

/// Forward steps from `from` to `to` in the cyclic group-id space. Group
/// ids live in `[0, modulus)`, so the u32 half-space trick does not apply.
fn cyclic_ahead(from: u32, to: u32, modulus: u32) -> u32 {
    if to >= from {
        to - from
    } else {
        to + (modulus - from)
    }
}
