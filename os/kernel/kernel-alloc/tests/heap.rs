mod common;

use common::{MIB, PAGE, bitmap_window, boot};
use kernel_alloc::{AllocError, Context, PoolKind};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::Mmu;

const HEAP: u32 = 0xC010_0000;

fn va(addr: u32) -> VirtualAddress {
    VirtualAddress::new(addr)
}

#[test]
fn small_blocks_share_one_arena() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let free_before = mm.free_pages(PoolKind::Kernel);

    let a = mm.sys_malloc(Context::Kernel, 10).unwrap();
    let b = mm.sys_malloc(Context::Kernel, 16).unwrap();
    assert_eq!(a, va(HEAP + 272));
    assert_eq!(b, va(HEAP + 288));
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 1);

    // Another class gets its own arena.
    let c = mm.sys_malloc(Context::Kernel, 100).unwrap();
    assert_eq!(c.as_u32() & !(PAGE - 1), HEAP + PAGE);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 2);

    mm.sys_free(Context::Kernel, a);
    mm.sys_free(Context::Kernel, b);
    mm.sys_free(Context::Kernel, c);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);
}

#[test]
fn reused_blocks_come_back_zeroed() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);

    let a = mm.sys_malloc(Context::Kernel, 64).unwrap();
    let keep = mm.sys_malloc(Context::Kernel, 64).unwrap();
    unsafe { mm.mmu().fill(a, 0xFF, 64) };
    mm.sys_free(Context::Kernel, a);

    let again = mm.sys_malloc(Context::Kernel, 60).unwrap();
    assert_eq!(again, a);
    for offset in (0..64).step_by(4) {
        assert_eq!(unsafe { mm.mmu().read_u32(again + offset) }, 0);
    }
    mm.sys_free(Context::Kernel, again);
    mm.sys_free(Context::Kernel, keep);
}

#[test]
fn empty_arenas_are_reclaimed_once() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let free_before = mm.free_pages(PoolKind::Kernel);

    let big = mm.sys_malloc(Context::Kernel, 1000).unwrap();
    assert_eq!(big, va(HEAP + 48));
    mm.sys_free(Context::Kernel, big);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);
    let reclaimed = mm.mmu().invalidated().iter().filter(|&&v| v == va(HEAP)).count();
    assert_eq!(reclaimed, 1);
    assert_eq!(mm.query(va(HEAP)), None);

    // A fresh arena lands on the same page and starts out full again.
    let blocks: Vec<_> = (0..239).map(|_| mm.sys_malloc(Context::Kernel, 16).unwrap()).collect();
    assert_eq!(blocks[0], va(HEAP + 272));
    assert_eq!(blocks[238], va(HEAP + 272 + 238 * 16));
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 1);

    // The 240th block needs a second arena.
    let extra = mm.sys_malloc(Context::Kernel, 16).unwrap();
    assert_eq!(extra, va(HEAP + PAGE + 272));

    for block in blocks {
        mm.sys_free(Context::Kernel, block);
    }
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 1);
    mm.sys_free(Context::Kernel, extra);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);
}

#[test]
fn arenas_freed_out_of_order_are_reclaimed_on_their_last_block() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let free_before = mm.free_pages(PoolKind::Kernel);

    // 62 blocks of 64 bytes per arena; three full arenas.
    let blocks: Vec<_> = (0..3 * 62).map(|_| mm.sys_malloc(Context::Kernel, 64).unwrap()).collect();
    let (a, rest) = blocks.split_at(62);
    let (b, c) = rest.split_at(62);
    assert_eq!(a[0], va(HEAP + 96));
    assert_eq!(b[0], va(HEAP + PAGE + 96));
    assert_eq!(c[61], va(HEAP + 2 * PAGE + 96 + 61 * 64));
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 3);

    // Newest block first; in the last round the middle arena of the
    // partial list empties first.
    for i in (1..62).rev() {
        for arena in [a, b, c] {
            mm.sys_free(Context::Kernel, arena[i]);
            assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 3);
        }
    }
    for (done, arena) in [b, a, c].into_iter().enumerate() {
        mm.sys_free(Context::Kernel, arena[0]);
        assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 2 + done);
    }

    let invalidated = mm.mmu().invalidated();
    for base in [HEAP, HEAP + PAGE, HEAP + 2 * PAGE] {
        assert_eq!(invalidated.iter().filter(|&&v| v == va(base)).count(), 1);
    }
    assert_eq!(mm.sys_malloc(Context::Kernel, 64).unwrap(), va(HEAP + 96));
}

#[test]
fn large_requests_get_their_own_pages() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let free_before = mm.free_pages(PoolKind::Kernel);

    let ptr = mm.sys_malloc(Context::Kernel, 4097).unwrap();
    assert_eq!(ptr, va(HEAP + 32));
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 2);
    assert_eq!(unsafe { mm.mmu().read_u32(va(HEAP + 4)) }, 2);
    assert_eq!(unsafe { mm.mmu().read_u32(ptr + 4064) }, 0);

    mm.sys_free(Context::Kernel, ptr);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);
    assert_eq!(mm.query(va(HEAP + PAGE)), None);
}

#[test]
fn unusable_sizes_are_rejected() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let pool_bytes = mm.layout().pool_bytes(PoolKind::Kernel) as usize;

    assert_eq!(mm.sys_malloc(Context::Kernel, 0), Err(AllocError::InvalidSize(0)));
    assert_eq!(
        mm.sys_malloc(Context::Kernel, pool_bytes),
        Err(AllocError::InvalidSize(pool_bytes))
    );
    assert_eq!(mm.inspect_kernel_vspace(|v| v.bitmap().count_free()), 3840);
}

#[test]
fn requests_beyond_one_page_run_are_rejected() {
    let mut window = bitmap_window();
    let mm = boot(64 * MIB, &mut window);
    let free_before = mm.free_pages(PoolKind::Kernel);

    // Smaller than the pool, but more pages than one request may span.
    let huge = 16 * MIB as usize;
    assert!(huge < mm.layout().pool_bytes(PoolKind::Kernel) as usize);
    assert_eq!(mm.sys_malloc(Context::Kernel, huge), Err(AllocError::InvalidSize(huge)));

    let widest = 3839 * PAGE as usize - 32;
    assert_eq!(
        mm.sys_malloc(Context::Kernel, widest + 1),
        Err(AllocError::InvalidSize(widest + 1))
    );
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);

    let ptr = mm.sys_malloc(Context::Kernel, widest).unwrap();
    assert_eq!(ptr, va(HEAP + 32));
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before - 3839);
    mm.sys_free(Context::Kernel, ptr);
    assert_eq!(mm.free_pages(PoolKind::Kernel), free_before);
}

#[test]
fn arena_creation_masks_interrupts_briefly() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);

    let a = mm.sys_malloc(Context::Kernel, 32).unwrap();
    assert_eq!(mm.irq().disables(), 1);
    assert!(mm.irq().enabled());

    let b = mm.sys_malloc(Context::Kernel, 32).unwrap();
    assert_eq!(mm.irq().disables(), 1);

    mm.sys_free(Context::Kernel, a);
    mm.sys_free(Context::Kernel, b);
    assert!(mm.irq().enabled());
}

#[test]
#[should_panic(expected = "double free")]
fn double_free_is_fatal() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let a = mm.sys_malloc(Context::Kernel, 128).unwrap();
    let _keep = mm.sys_malloc(Context::Kernel, 128).unwrap();
    mm.sys_free(Context::Kernel, a);
    mm.sys_free(Context::Kernel, a);
}

#[test]
#[should_panic(expected = "lies below the kernel heap")]
fn kernel_free_below_the_heap_is_fatal() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    mm.sys_free(Context::Kernel, va(0xC000_8000));
}

#[test]
#[should_panic(expected = "is inside the large allocation")]
fn interior_pointer_of_a_large_allocation_is_fatal() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let ptr = mm.sys_malloc(Context::Kernel, 2000).unwrap();
    mm.sys_free(Context::Kernel, ptr + 16);
}
