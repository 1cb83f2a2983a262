use fecweave::fec::{
    init_gf_tables, read_header, GroupDecoder, GroupEncoder, Shard, ShardKind, HEADER_SIZE,
};
use fecweave::optimize::MemoryPool;
use fecweave::FecError;
use once_cell::sync::Lazy;
use std::sync::Arc;

static POOL: Lazy<Arc<MemoryPool>> = Lazy::new(|| Arc::new(MemoryPool::new(256, 2048)));

/// Build an encode buffer: `reserve` transport bytes, room for the shard
/// header, then the body.
fn make_payload(reserve: usize, body: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; reserve + HEADER_SIZE + body.len()];
    buf[reserve + HEADER_SIZE..].copy_from_slice(body);
    buf
}

fn body_pattern(shard: usize, len: usize) -> Vec<u8> {
    (0..len).map(|i| (shard * 41 + i * 7 + 3) as u8).collect()
}

/// Run one full group through an encoder, returning the wire image of
/// every shard (data then parity) plus the original bodies.
fn wire_group(
    enc: &mut GroupEncoder,
    data_shards: usize,
    body_len: usize,
) -> (Vec<Vec<u8>>, Vec<Vec<u8>>) {
    let mut wire = Vec::new();
    let mut bodies = Vec::new();
    for i in 0..data_shards {
        let body = body_pattern(i, body_len);
        let mut payload = make_payload(0, &body);
        let parity = enc.encode(&mut payload, 0).unwrap();
        bodies.push(body);
        wire.push(payload);
        if i + 1 < data_shards {
            assert!(parity.is_empty(), "parity before the group boundary");
        } else {
            wire.extend(parity.iter().map(|s| s.as_bytes().to_vec()));
        }
    }
    (wire, bodies)
}

#[test]
fn parity_emitted_only_on_group_boundary() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();
    for i in 0..9 {
        let mut payload = make_payload(0, &body_pattern(i, 1394));
        assert!(enc.encode(&mut payload, 0).unwrap().is_empty());
    }
    let mut payload = make_payload(0, &body_pattern(9, 1394));
    let parity = enc.encode(&mut payload, 0).unwrap();
    assert_eq!(parity.len(), 3);
    for (i, shard) in parity.iter().enumerate() {
        assert_eq!(shard.seq, 10 + i as u32);
        assert_eq!(shard.kind, ShardKind::Parity);
        assert_eq!(shard.len(), HEADER_SIZE + 1394);
        let (seq, kind) = read_header(shard.as_bytes()).unwrap();
        assert_eq!(seq, 10 + i as u32);
        assert_eq!(kind, ShardKind::Parity);
    }
}

#[test]
fn encode_stamps_header_behind_the_reserve() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();
    for i in 0..4u32 {
        let mut payload = make_payload(200, &body_pattern(i as usize, 1294));
        enc.encode(&mut payload, 200).unwrap();
        let (seq, kind) = read_header(&payload[200..]).unwrap();
        assert_eq!(seq, i);
        assert_eq!(kind, ShardKind::Data);
        assert!(
            payload[..200].iter().all(|&b| b == 0),
            "reserve bytes must stay untouched"
        );
    }
}

#[test]
fn parity_sequence_numbers_follow_the_group() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();
    for group in 0u32..3 {
        let mut seqs = Vec::new();
        for i in 0..10 {
            let mut payload = make_payload(0, &body_pattern(i, 64));
            let parity = enc.encode(&mut payload, 0).unwrap();
            let (seq, _) = read_header(&payload).unwrap();
            assert_eq!(seq, group * 13 + i as u32);
            seqs.extend(parity.iter().map(|s| s.seq));
        }
        assert_eq!(
            seqs,
            vec![group * 13 + 10, group * 13 + 11, group * 13 + 12]
        );
    }
}

#[test]
fn recovers_two_missing_data_shards() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();
    let mut dec = GroupDecoder::new(10, 3, Arc::clone(&POOL)).unwrap();
    let (wire, bodies) = wire_group(&mut enc, 10, 1394);

    // Lose data shards 3 and 7; deliver eight data shards and two parity
    // shards, ten arrivals in all.
    let mut recovered: Vec<Shard> = Vec::new();
    let mut arrivals = 0;
    for (idx, shard) in wire.iter().enumerate() {
        if idx == 3 || idx == 7 || idx == 12 {
            continue;
        }
        arrivals += 1;
        let out = dec.decode(shard).unwrap();
        if arrivals < 10 {
            assert!(out.is_empty(), "recovery before the threshold");
        } else {
            recovered = out;
        }
    }
    assert_eq!(recovered.len(), 2);
    assert_eq!(recovered[0].seq, 3);
    assert_eq!(recovered[1].seq, 7);
    for shard in &recovered {
        assert_eq!(shard.kind, ShardKind::Data);
        let (seq, kind) = read_header(shard.as_bytes()).unwrap();
        assert_eq!(seq, shard.seq);
        assert_eq!(kind, ShardKind::Data);
    }
    assert_eq!(recovered[0].body(), &bodies[3][..]);
    assert_eq!(recovered[1].body(), &bodies[7][..]);
}

#[test]
fn complete_group_yields_nothing() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(4, 2, 0, Arc::clone(&POOL)).unwrap();
    let mut dec = GroupDecoder::new(4, 2, Arc::clone(&POOL)).unwrap();
    let (wire, _) = wire_group(&mut enc, 4, 200);

    for shard in &wire[..4] {
        assert!(dec.decode(shard).unwrap().is_empty());
    }
    // The group resolved on the fourth data shard; late parity starts a
    // fresh slot and stays silent.
    assert_eq!(dec.active_groups(), 0);
    assert!(dec.decode(&wire[4]).unwrap().is_empty());
    assert_eq!(dec.active_groups(), 1);
}

#[test]
fn recovery_with_only_parity_tail() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();
    let mut dec = GroupDecoder::new(10, 3, Arc::clone(&POOL)).unwrap();
    let (wire, bodies) = wire_group(&mut enc, 10, 700);

    // Lose three data shards; all three parity shards must carry the group.
    let mut recovered = Vec::new();
    for (idx, shard) in wire.iter().enumerate() {
        if idx == 0 || idx == 5 || idx == 9 {
            continue;
        }
        recovered.extend(dec.decode(shard).unwrap());
    }
    assert_eq!(recovered.len(), 3);
    let seqs: Vec<u32> = recovered.iter().map(|s| s.seq).collect();
    assert_eq!(seqs, vec![0, 5, 9]);
    for shard in &recovered {
        assert_eq!(shard.body(), &bodies[shard.seq as usize][..]);
    }
}

#[test]
fn mixed_length_payloads_recover_padded() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(4, 2, 0, Arc::clone(&POOL)).unwrap();
    let mut dec = GroupDecoder::new(4, 2, Arc::clone(&POOL)).unwrap();

    let lens = [100usize, 40, 80, 100];
    let bodies: Vec<Vec<u8>> = (0..4).map(|i| body_pattern(i, lens[i])).collect();
    let mut wire = Vec::new();
    for (i, body) in bodies.iter().enumerate() {
        let mut payload = make_payload(0, body);
        let parity = enc.encode(&mut payload, 0).unwrap();
        wire.push(payload);
        if i == 3 {
            for p in &parity {
                assert_eq!(p.len(), HEADER_SIZE + 100, "parity spans the longest body");
            }
            wire.extend(parity.iter().map(|s| s.as_bytes().to_vec()));
        }
    }

    // Lose the short shard 1; it comes back padded to the group maximum.
    let mut recovered = Vec::new();
    for (idx, shard) in wire.iter().enumerate() {
        if idx == 1 || idx == 5 {
            continue;
        }
        recovered.extend(dec.decode(shard).unwrap());
    }
    assert_eq!(recovered.len(), 1);
    let body = recovered[0].body();
    assert_eq!(body.len(), 100);
    assert_eq!(&body[..40], &bodies[1][..]);
    assert!(body[40..].iter().all(|&b| b == 0), "padding must be zero");
}

#[test]
fn encode_rejects_bad_payloads_without_consuming_seq() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 0, Arc::clone(&POOL)).unwrap();

    let mut tiny = vec![0u8; 4];
    assert!(matches!(
        enc.encode(&mut tiny, 0),
        Err(FecError::MalformedShard)
    ));
    let mut short_for_reserve = vec![0u8; 203];
    assert!(matches!(
        enc.encode(&mut short_for_reserve, 200),
        Err(FecError::MalformedShard)
    ));
    let mut huge = vec![0u8; POOL.block_size() + 1];
    assert!(matches!(
        enc.encode(&mut huge, 0),
        Err(FecError::PayloadTooLarge { .. })
    ));

    // None of the failures consumed a sequence number.
    assert_eq!(enc.next_seq(), 0);
    let mut payload = make_payload(0, &body_pattern(0, 32));
    enc.encode(&mut payload, 0).unwrap();
    let (seq, _) = read_header(&payload).unwrap();
    assert_eq!(seq, 0);
}

#[test]
fn decode_rejects_bad_shards() {
    init_gf_tables();
    let mut dec = GroupDecoder::new(10, 3, Arc::clone(&POOL)).unwrap();

    assert!(matches!(
        dec.decode(&[0u8; 5]),
        Err(FecError::MalformedShard)
    ));

    // Unknown kind value.
    let mut alien = vec![0u8; 64];
    alien[4..6].copy_from_slice(&7u16.to_le_bytes());
    assert!(matches!(dec.decode(&alien), Err(FecError::MalformedShard)));

    let oversize = vec![0u8; POOL.block_size() + 1];
    assert!(matches!(
        dec.decode(&oversize),
        Err(FecError::PayloadTooLarge { .. })
    ));

    assert_eq!(dec.active_groups(), 0, "rejected shards must not buffer");
}

#[test]
fn unaligned_start_seq_rounds_up_to_group_boundary() {
    init_gf_tables();
    let mut enc = GroupEncoder::new(10, 3, 5, Arc::clone(&POOL)).unwrap();
    assert_eq!(enc.next_seq(), 13);
    let mut payload = make_payload(0, &body_pattern(0, 16));
    enc.encode(&mut payload, 0).unwrap();
    let (seq, _) = read_header(&payload).unwrap();
    assert_eq!(seq, 13);

    // An aligned start is taken as is.
    let enc = GroupEncoder::new(10, 3, 26, Arc::clone(&POOL)).unwrap();
    assert_eq!(enc.next_seq(), 26);
}

#[test]
fn sequence_space_wraps_at_group_multiple() {
    init_gf_tables();
    // The sequence bound is the largest multiple of the group length, so
    // the final pre-wrap group ends exactly at the bound and the next
    // data shard is seq 0 again.
    let paws = (u32::MAX / 13) * 13;
    let mut enc = GroupEncoder::new(10, 3, paws - 13, Arc::clone(&POOL)).unwrap();
    assert_eq!(enc.next_seq(), paws - 13);

    let mut parity = Vec::new();
    for i in 0..10 {
        let mut payload = make_payload(0, &body_pattern(i, 48));
        parity = enc.encode(&mut payload, 0).unwrap();
        let (seq, _) = read_header(&payload).unwrap();
        assert_eq!(seq, paws - 13 + i as u32);
    }
    let seqs: Vec<u32> = parity.iter().map(|s| s.seq).collect();
    assert_eq!(seqs, vec![paws - 3, paws - 2, paws - 1]);
    assert_eq!(enc.next_seq(), 0, "sequence space must wrap to zero");
}

#[test]
fn fixed_bytes_roundtrip_through_recovery() {
    // A recovered shard must be byte-identical to the original, checked
    // against a pinned payload rather than a generated pattern.
    init_gf_tables();
    let body = hex::decode(concat!(
        "f0e1d2c3b4a5968778695a4b3c2d1e0f",
        "00112233445566778899aabbccddeeff",
        "deadbeefcafebabe0102030405060708"
    ))
    .unwrap();
    let mut enc = GroupEncoder::new(3, 2, 0, Arc::clone(&POOL)).unwrap();
    let mut dec = GroupDecoder::new(3, 2, Arc::clone(&POOL)).unwrap();

    let mut wire = Vec::new();
    for i in 0..3 {
        let mut chunk = body.clone();
        chunk.rotate_left(i * 16);
        let mut payload = make_payload(0, &chunk);
        let parity = enc.encode(&mut payload, 0).unwrap();
        wire.push(payload);
        wire.extend(parity.iter().map(|s| s.as_bytes().to_vec()));
    }

    let mut recovered = Vec::new();
    for (idx, shard) in wire.iter().enumerate() {
        if idx == 0 {
            continue;
        }
        recovered.extend(dec.decode(shard).unwrap());
    }
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].seq, 0);
    assert_eq!(recovered[0].body(), &body[..]);
}
