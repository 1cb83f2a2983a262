use fecweave::optimize::{FeatureDetector, MemoryPool, OptimizeConfig};

#[test]
fn memory_pool_alloc_free() {
    let pool = MemoryPool::new(4, 128);
    let block = pool.alloc();
    assert_eq!(block.len(), 128);
    assert_eq!((block.as_ptr() as usize) % 64, 0);
    assert_eq!(pool.in_use(), 1);
    pool.free(block);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn memory_pool_reuse() {
    let pool = MemoryPool::new(1, 64);
    let block = pool.alloc();
    let ptr = block.as_ptr();
    pool.free(block);
    let block2 = pool.alloc();
    assert_eq!(ptr, block2.as_ptr());
    pool.free(block2);
}

#[test]
fn memory_pool_zeroes_returned_blocks() {
    let pool = MemoryPool::new(1, 64);
    let mut block = pool.alloc();
    for b in block.iter_mut() {
        *b = 0xAB;
    }
    pool.free(block);
    let block2 = pool.alloc();
    assert!(block2.iter().all(|&b| b == 0), "recycled block must be zeroed");
    pool.free(block2);
}

#[test]
fn memory_pool_grows_past_capacity() {
    let pool = MemoryPool::new(1, 64);
    let a = pool.alloc();
    let b = pool.alloc();
    assert_eq!(b.len(), 64);
    assert_eq!(pool.in_use(), 2);
    pool.free(a);
    pool.free(b);
    assert_eq!(pool.in_use(), 0);
}

#[test]
fn pool_from_config_uses_its_sizing() {
    let cfg = OptimizeConfig {
        pool_capacity: 2,
        block_size: 256,
    };
    assert!(cfg.validate().is_ok());
    let pool = MemoryPool::from_cfg(&cfg);
    assert_eq!(pool.block_size(), 256);
    let block = pool.alloc();
    assert_eq!(block.len(), 256);
    pool.free(block);
}

#[test]
fn optimize_config_validation() {
    let mut cfg = OptimizeConfig::default();
    assert!(cfg.validate().is_ok());
    cfg.pool_capacity = 0;
    assert!(cfg.validate().is_err());
    cfg = OptimizeConfig::default();
    cfg.block_size = 32;
    assert!(cfg.validate().is_err());
}

#[test]
fn feature_detector_is_consistent() {
    let a = FeatureDetector::instance();
    let b = FeatureDetector::instance();
    assert!(std::ptr::eq(a, b), "detector must be a singleton");

    #[cfg(target_arch = "x86_64")]
    {
        use fecweave::optimize::CpuFeature;
        assert_eq!(
            a.has_feature(CpuFeature::AVX2),
            std::is_x86_feature_detected!("avx2")
        );
        assert_eq!(
            a.has_feature(CpuFeature::SSSE3),
            std::is_x86_feature_detected!("ssse3")
        );
    }
}
