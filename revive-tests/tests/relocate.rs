use revive_common::{
    abi::{RestoreCoreArgs, ARGS_SIZE, GET_ARG_OFFSET, GET_SELF_LEN, PR_ARG_STRING, RESTORE_CORE},
    codec::ImageWriter,
    image::{CoreEntry, VmaEntry, MAP_PRIVATE, PAGE_SIZE, PROT_READ, VMA_AREA_REGULAR},
};
use revive_restore::restorer;
use revive_tests::util::{in_child, Fixture, Region, RelocatedBlob};

fn missing_files() -> RestoreCoreArgs {
    RestoreCoreArgs::new("/nonexistent/core".as_ref(), "/nonexistent/self".as_ref()).unwrap()
}

#[test]
fn copy_reports_its_own_layout() {
    let blob = RelocatedBlob::new(&missing_files().to_block());
    assert_ne!(blob.base, restorer as usize);

    let arg = unsafe { blob.call(GET_ARG_OFFSET) } as usize;
    let end = unsafe { blob.call(GET_SELF_LEN) } as usize;

    assert_eq!(arg, blob.base + blob.args_offset);
    assert_eq!(end, blob.base + blob.len);
    assert!(blob.args_offset + ARGS_SIZE <= blob.len);
}

#[test]
fn copy_prints_its_block_and_rejects_unknown_opcodes() {
    let blob = RelocatedBlob::new(&missing_files().to_block());

    assert_eq!(unsafe { blob.call(PR_ARG_STRING) }, 0);
    for cmd in [0, 5, 99, -1] {
        assert_eq!(unsafe { blob.call(cmd) }, -1);
    }
}

#[test]
fn copy_exits_with_requested_code_on_missing_image() {
    let blob = RelocatedBlob::new(&missing_files().exit_on_failure(42).to_block());

    let code = in_child(|| {
        unsafe { blob.call(RESTORE_CORE) };
        1
    });

    assert_eq!(code, 42);
}

#[test]
fn copy_runs_the_engine_until_a_truncated_page() {
    let region = Region::map(1);
    let image = ImageWriter::new(CoreEntry::default())
        .vma(VmaEntry::new(
            region.addr,
            region.end(),
            PROT_READ,
            MAP_PRIVATE,
            VMA_AREA_REGULAR,
        ))
        .page(region.addr, &[3; PAGE_SIZE])
        .unwrap();
    let fixture = Fixture::new(&image, &[]);
    fixture.truncate_core(100);
    let blob = RelocatedBlob::new(&fixture.args().exit_on_failure(43).to_block());

    let code = in_child(|| {
        unsafe { blob.call(RESTORE_CORE) };
        1
    });

    assert_eq!(code, 43);
}
