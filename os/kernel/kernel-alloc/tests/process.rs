mod common;

use common::{MIB, PAGE, bitmap_window, boot};
use kernel_alloc::{Context, PoolKind};
use kernel_info::memory::{PAGE_DIR_PHYS, USER_STACK3_VADDR, USER_VADDR_START, USER_VSPACE_BITMAP_BYTES};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

fn va(addr: u32) -> VirtualAddress {
    VirtualAddress::new(addr)
}

fn user_bitmap() -> Vec<u8> {
    vec![0; USER_VSPACE_BITMAP_BYTES]
}

#[test]
fn process_directory_shares_the_kernel_half() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();

    assert_eq!(process.directory(), va(0xC010_0000));
    let frame = process.directory_frame().base();
    assert_eq!(frame, PhysicalAddress::new(0x20_0000));

    let entry = |dir: PhysicalAddress, slot: u32| mm.mmu().read_phys_u32(dir + slot * 4);
    let loader = PhysicalAddress::new(PAGE_DIR_PHYS);
    assert_eq!(entry(frame, 1023), frame.as_u32() | 0b111);
    for slot in [768, 769, 900, 1022] {
        assert_eq!(entry(frame, slot), entry(loader, slot));
    }
    for slot in [0, 32, 767] {
        assert_eq!(entry(frame, slot), 0);
    }
}

#[test]
fn user_pages_live_in_the_process_only() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();
    let kernel_free = mm.free_pages(PoolKind::Kernel);
    let user_free = mm.free_pages(PoolKind::User);

    mm.activate(Context::Process(&process));
    assert_eq!(mm.mmu().directory(), process.directory_frame().base());

    let start = mm.get_user_pages(&process, 2).unwrap();
    assert_eq!(start, va(USER_VADDR_START));
    assert_eq!(mm.translate(start), mm.layout().pool_base(PoolKind::User));
    assert_eq!(mm.translate(start + PAGE), mm.layout().pool_base(PoolKind::User) + PAGE);
    assert_eq!(mm.free_pages(PoolKind::User), user_free - 2);
    // The page table for the user range came from the kernel pool.
    assert_eq!(mm.free_pages(PoolKind::Kernel), kernel_free - 1);

    // User leaves carry the user bit.
    let table = mm.mmu().read_phys_u32(process.directory_frame().base() + 32 * 4) & !0xFFF;
    let leaf = mm.mmu().read_phys_u32(PhysicalAddress::new(table) + 0x48 * 4);
    assert_eq!(leaf & 0b111, 0b111);

    mm.activate(Context::Kernel);
    assert_eq!(mm.mmu().directory(), PhysicalAddress::new(PAGE_DIR_PHYS));
    assert_eq!(mm.query(start), None);
}

#[test]
fn process_heap_allocates_from_user_space() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();
    mm.activate(Context::Process(&process));
    let user_free = mm.free_pages(PoolKind::User);

    let ctx = Context::Process(&process);
    let a = mm.sys_malloc(ctx, 8).unwrap();
    let b = mm.sys_malloc(ctx, 8).unwrap();
    assert_eq!(a, va(USER_VADDR_START + 272));
    assert_eq!(b, a + 16);
    assert_eq!(mm.free_pages(PoolKind::User), user_free - 1);

    let large = mm.sys_malloc(ctx, 5000).unwrap();
    assert_eq!(large, va(USER_VADDR_START + PAGE + 32));
    assert_eq!(mm.free_pages(PoolKind::User), user_free - 3);

    mm.sys_free(ctx, large);
    mm.sys_free(ctx, a);
    mm.sys_free(ctx, b);
    assert_eq!(mm.free_pages(PoolKind::User), user_free);
    assert_eq!(process.inspect_vspace(|v| v.bitmap().count_free()), USER_VSPACE_BITMAP_BYTES * 8);
}

#[test]
fn chosen_user_addresses_are_tracked_or_not() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();
    mm.activate(Context::Process(&process));
    let ctx = Context::Process(&process);

    let chosen = va(USER_VADDR_START + PAGE);
    assert_eq!(mm.get_a_page(ctx, PoolKind::User, chosen), Ok(chosen));
    assert!(process.inspect_vspace(|v| v.bitmap().test(1)));

    assert_eq!(mm.get_user_pages(&process, 1).unwrap(), va(USER_VADDR_START));
    assert_eq!(mm.get_user_pages(&process, 1).unwrap(), va(USER_VADDR_START + 2 * PAGE));

    let free_bits = process.inspect_vspace(|v| v.bitmap().count_free());
    let copied = va(USER_VADDR_START + 8 * PAGE);
    assert_eq!(mm.get_a_page_without_vspace(PoolKind::User, copied), Ok(copied));
    assert!(mm.query(copied).is_some());
    assert_eq!(process.inspect_vspace(|v| v.bitmap().count_free()), free_bits);
}

#[test]
#[should_panic(expected = "may not take")]
fn process_cannot_take_kernel_pages_by_address() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();
    let _ = mm.get_a_page(Context::Process(&process), PoolKind::Kernel, va(0xC010_2000));
}

#[test]
fn releasing_a_process_returns_every_frame() {
    let mut window = bitmap_window();
    let mm = boot(32 * MIB, &mut window);
    let kernel_free = mm.free_pages(PoolKind::Kernel);
    let user_free = mm.free_pages(PoolKind::User);

    let mut storage = user_bitmap();
    let process = mm.new_process_memory(&mut storage).unwrap();
    mm.activate(Context::Process(&process));
    let ctx = Context::Process(&process);

    mm.get_user_pages(&process, 3).unwrap();
    mm.sys_malloc(ctx, 200).unwrap();
    let stack = va(USER_STACK3_VADDR);
    assert_eq!(mm.get_a_page(ctx, PoolKind::User, stack), Ok(stack));
    // Tables for the image and for the stack.
    assert_eq!(mm.free_pages(PoolKind::Kernel), kernel_free - 3);
    assert_eq!(mm.free_pages(PoolKind::User), user_free - 5);

    mm.release_process_memory(process);

    assert_eq!(mm.free_pages(PoolKind::Kernel), kernel_free);
    assert_eq!(mm.free_pages(PoolKind::User), user_free);
    assert_eq!(mm.mmu().directory(), PhysicalAddress::new(PAGE_DIR_PHYS));
    assert_eq!(mm.inspect_kernel_vspace(|v| v.bitmap().count_free()), 3840);
}
